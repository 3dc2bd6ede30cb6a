//! Per-event-family parsers.
//!
//! Each parser receives the tokenized argv of one event line and produces a
//! normalized payload. Parsers never touch shared error state; they return
//! [`ParseFail`] and the ingestion driver counts and classifies.

mod power;
mod sched;

use crate::event::{EventKind, EventPayload};
use crate::pool::StringPool;

/// Why an event's arguments could not be parsed. Either way the line is
/// counted and skipped; ingestion continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFail {
    /// Argument vector did not match the family's grammar.
    BadArgs,
    /// A reconstructed task name exceeded the kernel comm length.
    NameOverflow,
}

/// Dispatch on the event family and normalize the payload.
///
/// Unrecognized families become [`EventPayload::Other`] and keep only their
/// raw argv.
pub fn parse_payload(
    pool: &mut StringPool,
    kind: EventKind,
    argv: &[&[u8]],
) -> Result<EventPayload, ParseFail> {
    match kind {
        EventKind::SchedSwitch => sched::sched_switch(pool, argv),
        EventKind::SchedWakeup => sched::sched_wake(pool, argv).map(EventPayload::SchedWakeup),
        EventKind::SchedWakeupNew => {
            sched::sched_wake(pool, argv).map(EventPayload::SchedWakeupNew)
        }
        EventKind::SchedWaking => sched::sched_wake(pool, argv).map(EventPayload::SchedWaking),
        EventKind::SchedMigrateTask => sched::sched_migrate(argv),
        EventKind::SchedProcessFork => sched::sched_fork(pool, argv),
        EventKind::SchedProcessExit => sched::sched_exit(argv),
        EventKind::CpuIdle => power::cpu_idle(argv),
        EventKind::CpuFrequency => power::cpu_frequency(argv),
        EventKind::Other => Ok(EventPayload::Other),
    }
}
