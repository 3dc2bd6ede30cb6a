//! Fixed-point trace timestamps.
//!
//! Trace files print timestamps as decimal seconds (`123.456789:`). Comparing
//! those as `f64` loses ordering for near-equal events, so timestamps are kept
//! as integer nanoseconds internally and only converted to seconds at the
//! plotting interface.

use std::fmt;
use std::ops::{Add, Sub};

use serde::Serialize;

/// Nanoseconds per second.
const NSEC_PER_SEC: i64 = 1_000_000_000;

/// Maximum number of fractional digits a trace timestamp can carry.
pub const MAX_PRECISION: u8 = 9;

/// A signed trace timestamp with nanosecond resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TraceTime {
    ns: i64,
}

impl TraceTime {
    pub const ZERO: TraceTime = TraceTime { ns: 0 };
    pub const MAX: TraceTime = TraceTime { ns: i64::MAX };

    pub const fn from_ns(ns: i64) -> Self {
        TraceTime { ns }
    }

    pub const fn as_ns(self) -> i64 {
        self.ns
    }

    /// Seconds as `f64`, for the plotting arrays.
    pub fn to_secs(self) -> f64 {
        self.ns as f64 / NSEC_PER_SEC as f64
    }

    pub fn saturating_sub(self, rhs: TraceTime) -> TraceTime {
        TraceTime {
            ns: self.ns.saturating_sub(rhs.ns),
        }
    }

    pub const fn is_negative(self) -> bool {
        self.ns < 0
    }
}

impl Add for TraceTime {
    type Output = TraceTime;

    fn add(self, rhs: TraceTime) -> TraceTime {
        TraceTime {
            ns: self.ns + rhs.ns,
        }
    }
}

impl Sub for TraceTime {
    type Output = TraceTime;

    fn sub(self, rhs: TraceTime) -> TraceTime {
        TraceTime {
            ns: self.ns - rhs.ns,
        }
    }
}

impl fmt::Display for TraceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.ns < 0 { "-" } else { "" };
        let abs = self.ns.unsigned_abs();
        write!(
            f,
            "{}{}.{:09}",
            sign,
            abs / NSEC_PER_SEC as u64,
            abs % NSEC_PER_SEC as u64
        )
    }
}

/// Parse a timestamp token of the form `[-]?DIGITS(.DIGITS)?:`.
///
/// The terminating colon is mandatory; anything else after the digits fails
/// the parse. Returns the timestamp and the number of fractional digits, so
/// the caller can record the precision of the trace.
pub fn parse_timestamp(tok: &[u8]) -> Option<(TraceTime, u8)> {
    let body = tok.strip_suffix(b":")?;
    let (negative, body) = match body.strip_prefix(b"-") {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    if body.is_empty() {
        return None;
    }

    let mut secs: i64 = 0;
    let mut i = 0;
    while i < body.len() && body[i].is_ascii_digit() {
        secs = secs
            .checked_mul(10)?
            .checked_add((body[i] - b'0') as i64)?;
        i += 1;
    }
    if i == 0 {
        return None;
    }

    let mut frac: i64 = 0;
    let mut digits: u8 = 0;
    if i < body.len() {
        if body[i] != b'.' {
            return None;
        }
        i += 1;
        let frac_start = i;
        while i < body.len() && body[i].is_ascii_digit() {
            // Digits beyond nanosecond resolution are dropped.
            if digits < MAX_PRECISION {
                frac = frac * 10 + (body[i] - b'0') as i64;
                digits += 1;
            }
            i += 1;
        }
        if i == frac_start || i != body.len() {
            return None;
        }
    }

    for _ in digits..MAX_PRECISION {
        frac *= 10;
    }
    let mut ns = secs.checked_mul(NSEC_PER_SEC)?.checked_add(frac)?;
    if negative {
        ns = -ns;
    }
    Some((TraceTime::from_ns(ns), digits))
}
