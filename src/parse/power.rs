//! Parsers for `cpu_frequency` and `cpu_idle`.
//!
//! Both families print two positional arguments with fixed prefixes:
//! `state=N cpu_id=N`.

use super::ParseFail;
use crate::event::{CpuFrequencyFields, CpuIdleFields, EventPayload};
use crate::params::{after_prefix, parse_u32, parse_u64, uint_after_prefix};

pub fn cpu_frequency(argv: &[&[u8]]) -> Result<EventPayload, ParseFail> {
    if argv.len() < 2 {
        return Err(ParseFail::BadArgs);
    }
    let freq = after_prefix(argv[0], b"state=")
        .and_then(parse_u64)
        .ok_or(ParseFail::BadArgs)?;
    let cpu = uint_after_prefix(argv[1], b"cpu_id=").ok_or(ParseFail::BadArgs)?;
    Ok(EventPayload::CpuFrequency(CpuFrequencyFields { cpu, freq }))
}

pub fn cpu_idle(argv: &[&[u8]]) -> Result<EventPayload, ParseFail> {
    if argv.len() < 2 {
        return Err(ParseFail::BadArgs);
    }
    // The state is a signed value printed as unsigned; 4294967295 means the
    // CPU left the idle state.
    let state = after_prefix(argv[0], b"state=")
        .and_then(parse_u32)
        .ok_or(ParseFail::BadArgs)? as i32;
    let cpu = uint_after_prefix(argv[1], b"cpu_id=").ok_or(ParseFail::BadArgs)?;
    Ok(EventPayload::CpuIdle(CpuIdleFields { cpu, state }))
}
