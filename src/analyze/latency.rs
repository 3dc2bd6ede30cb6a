//! Latency records and the index queries the plotter issues against them.

use serde::Serialize;

use crate::event::{EventKind, EventPayload, TraceEvent};
use crate::time::TraceTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LatencyKind {
    /// Wakeup to the switch that scheduled the task in.
    Sched,
    /// `sched_waking` to the matching `sched_wakeup`.
    Wakeup,
}

/// One latency sample. The indices point into the event store, which is
/// append-only, so they stay valid across filter changes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Latency {
    pub kind: LatencyKind,
    pub pid: i32,
    pub cpu: u32,
    /// Event that made the task runnable.
    pub runnable_idx: u32,
    /// Event that resolved the wait.
    pub sched_idx: u32,
    pub delay: TraceTime,
}

impl Latency {
    pub fn delay_secs(&self) -> f64 {
        self.delay.to_secs()
    }
}

/// First event at time >= `t0` that is a `sched_switch` scheduling `pid` out
/// into a non-runnable state. Binary-searched start, then a forward scan.
pub fn find_next_sched_sleep_event(
    events: &[TraceEvent],
    t0: TraceTime,
    pid: i32,
) -> Option<usize> {
    let start = events.partition_point(|e| e.time < t0);
    events[start..]
        .iter()
        .position(|e| match &e.payload {
            EventPayload::SchedSwitch(f) => {
                f.prev_pid == pid && f.prev_state.is_some_and(|s| !s.is_runnable())
            }
            _ => false,
        })
        .map(|i| start + i)
}

/// Walk backward from `sched_idx` to the nearest wake-family event of `kind`
/// targeting `pid`.
pub fn find_previous_wake_event(
    events: &[TraceEvent],
    sched_idx: usize,
    pid: i32,
    kind: EventKind,
) -> Option<usize> {
    events[..sched_idx].iter().rposition(|e| {
        if e.kind() != kind {
            return false;
        }
        match &e.payload {
            EventPayload::SchedWakeup(f)
            | EventPayload::SchedWakeupNew(f)
            | EventPayload::SchedWaking(f) => f.pid == pid,
            _ => false,
        }
    })
}
