//! Task and per-(task, CPU) timeline records.
//!
//! Tasks and their timeline tracks live in flat vectors owned by the
//! analyzer; relationships are plain indices, so there are no reference
//! cycles to manage.

use serde::Serialize;

use crate::pool::{StrRef, StringPool};
use crate::time::TraceTime;

pub type TaskId = u32;
pub type CpuTaskId = u32;

/// On/off levels of the scheduling step function.
pub const SCHED_ON: f64 = 1.0;
pub const SCHED_OFF: f64 = 0.0;
/// Height of a wakeup-latency error bar.
pub const DELAY_BAR_HEIGHT: f64 = 0.6;
/// y level of the sleep-reason scatter points.
pub const SCATTER_HEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl TaskColor {
    /// Parse an `RRGGBB` hex triple.
    pub fn from_hex(s: &str) -> Option<TaskColor> {
        let s = s.as_bytes();
        if s.len() != 6 {
            return None;
        }
        let hex = |b: u8| -> Option<u8> {
            match b {
                b'0'..=b'9' => Some(b - b'0'),
                b'a'..=b'f' => Some(b - b'a' + 10),
                b'A'..=b'F' => Some(b - b'A' + 10),
                _ => None,
            }
        };
        let byte = |i: usize| -> Option<u8> { Some(hex(s[i])? << 4 | hex(s[i + 1])?) };
        Some(TaskColor {
            r: byte(0)?,
            g: byte(2)?,
            b: byte(4)?,
        })
    }

    pub fn to_hex(self) -> String {
        format!("{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

macro_rules! rgb {
    ($hex:literal) => {
        TaskColor {
            r: (($hex >> 16) & 0xff) as u8,
            g: (($hex >> 8) & 0xff) as u8,
            b: ($hex & 0xff) as u8,
        }
    };
}

/// Default task palette. Sixteen visually distinct entries; a task's color
/// is picked by PID so the assignment survives reloads and filtering.
pub const PALETTE: [TaskColor; 16] = [
    rgb!(0xe6194b),
    rgb!(0x3cb44b),
    rgb!(0xffe119),
    rgb!(0x4363d8),
    rgb!(0xf58231),
    rgb!(0x911eb4),
    rgb!(0x46f0f0),
    rgb!(0xf032e6),
    rgb!(0xbcf60c),
    rgb!(0xfabebe),
    rgb!(0x008080),
    rgb!(0xe6beff),
    rgb!(0x9a6324),
    rgb!(0xfffac8),
    rgb!(0x800000),
    rgb!(0xaaffc3),
];

pub fn default_color(pid: i32) -> TaskColor {
    PALETTE[pid as u32 as usize % PALETTE.len()]
}

/// Long-lived per-PID record.
#[derive(Debug)]
pub struct Task {
    pub pid: i32,
    /// Display name; `None` until some event names the task.
    pub name: Option<StrRef>,
    /// Bumped each time the PID is recycled within one trace.
    pub generation: u32,
    pub first_seen: TraceTime,
    /// True when the task was created by an observed fork rather than being
    /// live at trace start.
    pub forked: bool,
    pub exit_time: Option<TraceTime>,
    pub color: TaskColor,
    /// Indices into the analyzer's CpuTask arena, one per CPU the task ran on.
    pub cpu_tasks: Vec<CpuTaskId>,
}

impl Task {
    pub fn new(pid: i32, first_seen: TraceTime, color: TaskColor) -> Task {
        Task {
            pid,
            name: None,
            generation: 0,
            first_seen,
            forked: false,
            exit_time: None,
            color,
            cpu_tasks: Vec::new(),
        }
    }

    /// Name for display, with the recycle generation as a suffix so two
    /// incarnations of one PID can be told apart.
    pub fn display_name(&self, pool: &StringPool) -> String {
        let base = match self.name {
            Some(r) => pool.lossy(r).into_owned(),
            None => format!("<{}>", self.pid),
        };
        if self.generation > 0 {
            format!("{}-{}", base, self.generation)
        } else {
            base
        }
    }
}

/// Alias left behind when a PID gets recycled. Carries no timelines of its
/// own; it only records which task record now owns the PID.
#[derive(Debug, Clone, Copy)]
pub struct GhostAlias {
    pub pid: i32,
    /// The closed record of the earlier incarnation.
    pub prior: TaskId,
    /// The record the PID now resolves to.
    pub canonical: TaskId,
}

/// One timeline track: everything the plotter draws for one task on one CPU.
///
/// `sched_timev`/`sched_data` form a step function that is strictly
/// alternating between [`SCHED_ON`] and [`SCHED_OFF`]. The delay arrays are
/// error-bar data for wakeup latency: `delay_timev[i] + delay[i]` is the
/// moment the task got the CPU. The remaining pairs are scatter points for
/// the off-CPU reason.
#[derive(Debug, Default)]
pub struct CpuTask {
    pub pid: i32,
    pub cpu: u32,

    pub sched_timev: Vec<f64>,
    pub sched_data: Vec<f64>,

    pub delay: Vec<f64>,
    pub delay_zero: Vec<f64>,
    pub delay_height: Vec<f64>,
    pub delay_timev: Vec<f64>,
    pub vertical_delay: Vec<f64>,

    pub running_timev: Vec<f64>,
    pub running_data: Vec<f64>,
    pub preempted_timev: Vec<f64>,
    pub preempted_data: Vec<f64>,
    pub uninterruptible_timev: Vec<f64>,
    pub uninterruptible_data: Vec<f64>,
}

impl CpuTask {
    pub fn new(pid: i32, cpu: u32) -> CpuTask {
        CpuTask {
            pid,
            cpu,
            ..Default::default()
        }
    }

    /// Append a step sample, skipping repeats so the levels keep alternating.
    pub(crate) fn push_sched(&mut self, t: f64, on: bool) {
        let level = if on { SCHED_ON } else { SCHED_OFF };
        if self.sched_data.last() == Some(&level) {
            return;
        }
        self.sched_timev.push(t);
        self.sched_data.push(level);
    }

    pub(crate) fn push_delay(&mut self, wake_t: f64, delay: f64) {
        self.delay.push(delay);
        self.delay_zero.push(0.0);
        self.delay_height.push(DELAY_BAR_HEIGHT);
        self.delay_timev.push(wake_t);
        self.vertical_delay.push(wake_t + delay);
    }

    pub(crate) fn push_running(&mut self, t: f64) {
        self.running_timev.push(t);
        self.running_data.push(SCATTER_HEIGHT);
    }

    pub(crate) fn push_preempted(&mut self, t: f64) {
        self.preempted_timev.push(t);
        self.preempted_data.push(SCATTER_HEIGHT);
    }

    pub(crate) fn push_uninterruptible(&mut self, t: f64) {
        self.uninterruptible_timev.push(t);
        self.uninterruptible_data.push(SCATTER_HEIGHT);
    }
}
