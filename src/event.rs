//! Normalized trace events.
//!
//! Every input line becomes one [`TraceEvent`] in an append-only store, in
//! file order. The event carries a tagged payload with the fields the per-CPU
//! state machines consume, plus the interned raw argument tokens for the
//! regex filter.

use serde::Serialize;

use crate::pool::StrRef;
use crate::time::TraceTime;

/// Highest CPU index any trace is allowed to reference.
pub const NR_CPUS_ALLOWED: u32 = 256;

/// Kernel task state parsed from the one- or two-character state strings that
/// `sched_switch` prints (`S`, `D`, `R+`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskState(u32);

impl TaskState {
    pub const RUNNABLE: TaskState = TaskState(0);

    const INTERRUPTIBLE: u32 = 0x01; // S
    const UNINTERRUPTIBLE: u32 = 0x02; // D
    const STOPPED: u32 = 0x04; // T
    const TRACED: u32 = 0x08; // t
    const EXIT_DEAD: u32 = 0x10; // X
    const EXIT_ZOMBIE: u32 = 0x20; // Z
    const PARKED: u32 = 0x40; // P
    const IDLE: u32 = 0x80; // I
    const PREEMPTED: u32 = 0x100; // +

    fn from_char(c: u8) -> Option<u32> {
        match c {
            b'R' => Some(0),
            b'S' => Some(Self::INTERRUPTIBLE),
            b'D' => Some(Self::UNINTERRUPTIBLE),
            b'T' => Some(Self::STOPPED),
            b't' => Some(Self::TRACED),
            b'X' => Some(Self::EXIT_DEAD),
            b'Z' => Some(Self::EXIT_ZOMBIE),
            b'P' => Some(Self::PARKED),
            b'I' => Some(Self::IDLE),
            _ => None,
        }
    }

    /// Parse a state string. `None` is the parser-error sentinel; the caller
    /// records the event as "unknown sleep reason" and keeps going.
    pub fn parse(bytes: &[u8]) -> Option<TaskState> {
        match bytes {
            [c] => Self::from_char(*c).map(TaskState),
            [c, b'+'] => Self::from_char(*c).map(|v| TaskState(v | Self::PREEMPTED)),
            _ => None,
        }
    }

    /// Still wants the CPU: `R` or `R+`.
    pub fn is_runnable(self) -> bool {
        self.0 & !Self::PREEMPTED == 0
    }

    pub fn is_uninterruptible(self) -> bool {
        self.0 & Self::UNINTERRUPTIBLE != 0
    }

    pub fn preempted(self) -> bool {
        self.0 & Self::PREEMPTED != 0
    }
}

/// Event families this crate recognizes. Everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    SchedSwitch,
    SchedWakeup,
    SchedWakeupNew,
    SchedWaking,
    SchedMigrateTask,
    SchedProcessFork,
    SchedProcessExit,
    CpuIdle,
    CpuFrequency,
    Other,
}

impl EventKind {
    pub fn from_name(name: &[u8]) -> EventKind {
        match name {
            b"sched_switch" => EventKind::SchedSwitch,
            b"sched_wakeup" => EventKind::SchedWakeup,
            b"sched_wakeup_new" => EventKind::SchedWakeupNew,
            b"sched_waking" => EventKind::SchedWaking,
            b"sched_migrate_task" => EventKind::SchedMigrateTask,
            b"sched_process_fork" => EventKind::SchedProcessFork,
            b"sched_process_exit" => EventKind::SchedProcessExit,
            b"cpu_idle" => EventKind::CpuIdle,
            b"cpu_frequency" => EventKind::CpuFrequency,
            _ => EventKind::Other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::SchedSwitch => "sched_switch",
            EventKind::SchedWakeup => "sched_wakeup",
            EventKind::SchedWakeupNew => "sched_wakeup_new",
            EventKind::SchedWaking => "sched_waking",
            EventKind::SchedMigrateTask => "sched_migrate_task",
            EventKind::SchedProcessFork => "sched_process_fork",
            EventKind::SchedProcessExit => "sched_process_exit",
            EventKind::CpuIdle => "cpu_idle",
            EventKind::CpuFrequency => "cpu_frequency",
            EventKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedSwitchFields {
    pub prev_pid: i32,
    pub prev_prio: Option<u32>,
    /// `None` when the state string was missing or unknown.
    pub prev_state: Option<TaskState>,
    pub prev_name: StrRef,
    pub next_pid: i32,
    pub next_prio: Option<u32>,
    pub next_name: StrRef,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedWakeFields {
    pub pid: i32,
    /// `None` for the `[PRIO]<CANT FIND FIELD success>` shape, where the
    /// priority cannot be read reliably.
    pub prio: Option<u32>,
    pub target_cpu: u32,
    pub name: StrRef,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedMigrateFields {
    pub pid: i32,
    pub prio: u32,
    pub orig_cpu: u32,
    pub dest_cpu: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedForkFields {
    pub parent_pid: i32,
    pub child_pid: i32,
    pub child_name: StrRef,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedExitFields {
    pub pid: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct CpuIdleFields {
    pub cpu: u32,
    /// The kernel prints the state as unsigned; `-1` (idle exit) arrives as
    /// `4294967295` and is reinterpreted here.
    pub state: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct CpuFrequencyFields {
    pub cpu: u32,
    pub freq: u64,
}

/// Normalized per-family payload.
#[derive(Debug, Clone, Copy)]
pub enum EventPayload {
    SchedSwitch(SchedSwitchFields),
    SchedWakeup(SchedWakeFields),
    SchedWakeupNew(SchedWakeFields),
    SchedWaking(SchedWakeFields),
    SchedMigrateTask(SchedMigrateFields),
    SchedProcessFork(SchedForkFields),
    SchedProcessExit(SchedExitFields),
    CpuIdle(CpuIdleFields),
    CpuFrequency(CpuFrequencyFields),
    Other,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::SchedSwitch(_) => EventKind::SchedSwitch,
            EventPayload::SchedWakeup(_) => EventKind::SchedWakeup,
            EventPayload::SchedWakeupNew(_) => EventKind::SchedWakeupNew,
            EventPayload::SchedWaking(_) => EventKind::SchedWaking,
            EventPayload::SchedMigrateTask(_) => EventKind::SchedMigrateTask,
            EventPayload::SchedProcessFork(_) => EventKind::SchedProcessFork,
            EventPayload::SchedProcessExit(_) => EventKind::SchedProcessExit,
            EventPayload::CpuIdle(_) => EventKind::CpuIdle,
            EventPayload::CpuFrequency(_) => EventKind::CpuFrequency,
            EventPayload::Other => EventKind::Other,
        }
    }
}

/// One normalized event, one per parsed input line.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub time: TraceTime,
    pub cpu: u32,
    /// PID from the line header (the task the tracer attributed the line to).
    pub pid: i32,
    /// Task name from the line header.
    pub name: StrRef,
    pub payload: EventPayload,
    /// Raw argument tokens, interned. Consumed by the regex filter.
    pub argv: Vec<StrRef>,
    /// Backtrace continuation lines (sampling-profiler traces only).
    pub backtrace: Option<Vec<StrRef>>,
}

impl TraceEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_single_char() {
        assert_eq!(TaskState::parse(b"R"), Some(TaskState::RUNNABLE));
        assert!(TaskState::parse(b"S").unwrap().0 == TaskState::INTERRUPTIBLE);
        assert!(TaskState::parse(b"D").unwrap().is_uninterruptible());
        assert!(TaskState::parse(b"t").is_some());
        assert!(TaskState::parse(b"I").is_some());
    }

    #[test]
    fn test_state_preempted() {
        let s = TaskState::parse(b"R+").unwrap();
        assert!(s.preempted());
        assert!(s.is_runnable());
        let d = TaskState::parse(b"D").unwrap();
        assert!(!d.preempted());
        assert!(!d.is_runnable());
    }

    #[test]
    fn test_state_unknown_is_sentinel() {
        assert_eq!(TaskState::parse(b"Q"), None);
        assert_eq!(TaskState::parse(b""), None);
        assert_eq!(TaskState::parse(b"S|D"), None);
        assert_eq!(TaskState::parse(b"++"), None);
    }

    #[test]
    fn test_kind_lookup() {
        assert_eq!(EventKind::from_name(b"sched_switch"), EventKind::SchedSwitch);
        assert_eq!(EventKind::from_name(b"cpu_idle"), EventKind::CpuIdle);
        assert_eq!(EventKind::from_name(b"sys_enter"), EventKind::Other);
        // Case sensitive.
        assert_eq!(EventKind::from_name(b"Sched_switch"), EventKind::Other);
    }
}
