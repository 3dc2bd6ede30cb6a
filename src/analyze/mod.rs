//! Ingestion driver and per-CPU state reconstruction.
//!
//! A single forward pass over the trace file tokenizes and parses each line,
//! appends the normalized event to the store and feeds it through the per-CPU
//! state machines that build the task timelines, the latency lists and the
//! frequency/idle traces. The per-CPU reconstruction state only lives for the
//! duration of the pass.

pub mod latency;
pub mod task;

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::event::{
    EventKind, EventPayload, SchedForkFields, SchedSwitchFields, SchedWakeFields, TraceEvent,
    NR_CPUS_ALLOWED,
};
use crate::filter::FilterEngine;
use crate::parse::{parse_payload, ParseFail};
use crate::pool::{StrRef, StringPool};
use crate::statefile::StateFile;
use crate::time::TraceTime;
use crate::tokenizer::{detect_dialect, is_comment, is_continuation, tokenize, Dialect, LineFail};

use latency::{find_next_sched_sleep_event, find_previous_wake_event, Latency, LatencyKind};
use task::{default_color, CpuTask, CpuTaskId, GhostAlias, Task, TaskId};

/// How many events to ingest between progress callbacks and cancel checks.
pub const DEFAULT_CHUNK_EVENTS: usize = 65_536;

/// Counters for everything that went wrong without stopping the load.
#[derive(Debug, Default, Clone, Serialize)]
pub struct LoadSummary {
    pub lines: u64,
    pub events: u64,
    /// Lines that matched no recognized grammar.
    pub unparsed: u64,
    /// Lines dropped because a task name exceeded the kernel comm length.
    pub name_overflows: u64,
    /// Switch events whose prev_state string was missing or unknown.
    pub unknown_states: u64,
    /// Wakeups whose priority field could not be read (the
    /// `[PRIO]<CANT FIND FIELD success>` shape).
    pub unresolved_prios: u64,
    /// Events whose payload named a CPU outside the supported range.
    pub cpu_range: u64,
    /// Latency samples discarded because the events were out of order.
    pub negative_delays: u64,
}

impl LoadSummary {
    pub fn has_warnings(&self) -> bool {
        self.unparsed > 0
            || self.name_overflows > 0
            || self.unknown_states > 0
            || self.unresolved_prios > 0
            || self.cpu_range > 0
            || self.negative_delays > 0
    }
}

/// Errors that abort a load. Parse problems never land here; they are
/// counted in [`LoadSummary`] instead.
#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    /// Neither trace dialect matched the first lines of the file.
    UnknownDialect { lines_scanned: usize },
    /// An internal invariant was violated; a bug, not an input problem.
    Internal(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "cannot read trace: {e}"),
            LoadError::UnknownDialect { lines_scanned } => write!(
                f,
                "unsupported trace dialect: no recognizable event line in the \
                 first {lines_scanned} lines"
            ),
            LoadError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        LoadError::Io(e)
    }
}

/// Outcome of a completed `open` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Complete,
    /// The cancel flag was observed between chunks; the store is empty.
    Cancelled,
}

/// Cooperative driving of a load: a progress callback and a cancel flag, both
/// checked once per chunk of events.
pub struct LoadControl {
    pub chunk_events: usize,
    pub cancel: Arc<AtomicBool>,
    pub progress: Option<Box<dyn FnMut(u64)>>,
}

impl Default for LoadControl {
    fn default() -> Self {
        LoadControl {
            chunk_events: DEFAULT_CHUNK_EVENTS,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }
}

/// A task migrating between CPUs.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Migration {
    pub pid: i32,
    pub time: TraceTime,
    pub orig_cpu: u32,
    pub dest_cpu: u32,
    pub event_idx: u32,
}

/// A per-CPU step series (frequency or idle state).
#[derive(Debug, Default, Clone)]
pub struct CpuSeries {
    pub timev: Vec<f64>,
    pub data: Vec<f64>,
}

impl CpuSeries {
    fn push_step(&mut self, t: f64, v: f64) {
        self.timev.push(t);
        self.data.push(v);
    }
}

/// On-CPU time of one task inside a stats window.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStat {
    pub pid: i32,
    pub name: String,
    pub on_cpu: TraceTime,
}

#[derive(Debug, Clone, Copy)]
struct PendingWake {
    time: TraceTime,
    idx: u32,
}

/// Reconstruction state for one CPU, alive only while ingesting.
#[derive(Debug, Default)]
struct CpuState {
    running: Option<i32>,
    pending: HashMap<i32, PendingWake>,
}

#[derive(Debug, Default)]
struct IngestState {
    cpus: Vec<CpuState>,
    /// Last `sched_waking` per PID, consumed by the matching `sched_wakeup`.
    last_waking: HashMap<i32, PendingWake>,
}

impl IngestState {
    fn cpu_mut(&mut self, cpu: u32) -> &mut CpuState {
        let cpu = cpu as usize;
        if self.cpus.len() <= cpu {
            self.cpus.resize_with(cpu + 1, CpuState::default);
        }
        &mut self.cpus[cpu]
    }

    fn forget_pid(&mut self, pid: i32) {
        self.last_waking.remove(&pid);
        for cpu in &mut self.cpus {
            cpu.pending.remove(&pid);
            if cpu.running == Some(pid) {
                cpu.running = None;
            }
        }
    }
}

/// The analytical model of one trace file.
///
/// Everything the plotter reads lives here: the event store, the filtered
/// index vector, the task map, the per-(task, CPU) timeline tracks, the
/// frequency/idle traces and the latency lists.
pub struct TraceAnalyzer {
    pool: StringPool,
    pub events: Vec<TraceEvent>,
    pub filter: FilterEngine,

    tasks: Vec<Task>,
    task_ids: HashMap<i32, TaskId>,
    pub ghost_aliases: Vec<GhostAlias>,

    cpu_tasks: Vec<CpuTask>,
    cpu_task_ids: HashMap<(u32, i32), CpuTaskId>,

    pub cpu_freq: Vec<CpuSeries>,
    pub cpu_idle: Vec<CpuSeries>,
    pub migrations: Vec<Migration>,
    pub sched_latencies: Vec<Latency>,
    pub wakeup_latencies: Vec<Latency>,

    pub start_time: TraceTime,
    pub end_time: TraceTime,
    pub nr_cpus: u32,
    time_precision: Option<u8>,
    dialect: Option<Dialect>,

    summary: LoadSummary,
    state: StateFile,
    trace_path: Option<PathBuf>,
}

impl TraceAnalyzer {
    pub fn new() -> Self {
        TraceAnalyzer {
            pool: StringPool::new(),
            events: Vec::new(),
            filter: FilterEngine::new(),
            tasks: Vec::new(),
            task_ids: HashMap::new(),
            ghost_aliases: Vec::new(),
            cpu_tasks: Vec::new(),
            cpu_task_ids: HashMap::new(),
            cpu_freq: Vec::new(),
            cpu_idle: Vec::new(),
            migrations: Vec::new(),
            sched_latencies: Vec::new(),
            wakeup_latencies: Vec::new(),
            start_time: TraceTime::ZERO,
            end_time: TraceTime::ZERO,
            nr_cpus: 0,
            time_precision: None,
            dialect: None,
            summary: LoadSummary::default(),
            state: StateFile::default(),
            trace_path: None,
        }
    }

    /// Load a trace with default chunking and no cancellation.
    pub fn open(&mut self, path: &Path) -> Result<LoadStatus, LoadError> {
        let mut ctl = LoadControl::default();
        self.open_with(path, &mut ctl)
    }

    /// Load a trace, yielding to `ctl` between chunks.
    pub fn open_with(
        &mut self,
        path: &Path,
        ctl: &mut LoadControl,
    ) -> Result<LoadStatus, LoadError> {
        self.reset();
        self.trace_path = Some(path.to_path_buf());
        // Read persisted state first so colors apply as tasks are created.
        self.state = StateFile::load(path);

        match self.ingest(path, ctl) {
            Ok(LoadStatus::Cancelled) => {
                self.reset();
                Ok(LoadStatus::Cancelled)
            }
            Ok(LoadStatus::Complete) => {
                self.finalize();
                Ok(LoadStatus::Complete)
            }
            Err(e) => {
                // No partial state survives a failed load.
                self.reset();
                Err(e)
            }
        }
    }

    /// Persist user state and drop the model.
    pub fn close(&mut self) {
        if let Some(path) = self.trace_path.take() {
            for t in &self.tasks {
                if t.color != default_color(t.pid) {
                    self.state.colors.insert(t.pid, t.color);
                }
            }
            self.state.filter_pids = self.filter.pid_filter_pids().unwrap_or_default();
            self.state.filter_cpus = self.filter.cpu_filter_cpus().unwrap_or_default();
            if let Err(e) = self.state.save(&path) {
                warn!("cannot write state file for {}: {e}", path.display());
            }
        }
        self.reset();
    }

    fn reset(&mut self) {
        *self = TraceAnalyzer::new();
    }

    // -- Ingestion --

    fn ingest(&mut self, path: &Path, ctl: &mut LoadControl) -> Result<LoadStatus, LoadError> {
        let dialect = self.sniff_dialect(path)?;
        self.dialect = Some(dialect);
        debug!("trace dialect: {dialect:?}");

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut buf: Vec<u8> = Vec::with_capacity(512);
        let mut ingest = IngestState::default();
        let mut next_report = ctl.chunk_events;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let mut line: &[u8] = &buf;
            while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            self.summary.lines += 1;

            if dialect == Dialect::Perf && is_continuation(line) {
                self.attach_backtrace(line);
                continue;
            }
            if is_comment(line) {
                continue;
            }

            match tokenize(line) {
                Err(LineFail::CpuRange) => self.summary.cpu_range += 1,
                Err(LineFail::Malformed) => self.summary.unparsed += 1,
                Ok(raw) => {
                    if self.time_precision.is_none() {
                        self.time_precision = Some(raw.precision);
                    }
                    let kind = EventKind::from_name(raw.event_name);
                    match parse_payload(&mut self.pool, kind, &raw.argv) {
                        Err(ParseFail::BadArgs) => self.summary.unparsed += 1,
                        Err(ParseFail::NameOverflow) => self.summary.name_overflows += 1,
                        Ok(payload) => {
                            let name = self.pool.intern(&raw.comm);
                            let argv: Vec<StrRef> =
                                raw.argv.iter().map(|a| self.pool.intern(a)).collect();
                            let idx = self.events.len();
                            self.events.push(TraceEvent {
                                time: raw.time,
                                cpu: raw.cpu,
                                pid: raw.pid,
                                name,
                                payload,
                                argv,
                                backtrace: None,
                            });
                            self.summary.events += 1;
                            self.apply(idx, &mut ingest)?;
                        }
                    }
                }
            }

            if self.events.len() >= next_report {
                next_report = self.events.len() + ctl.chunk_events;
                if let Some(cb) = ctl.progress.as_mut() {
                    cb(self.events.len() as u64);
                }
                if ctl.cancel.load(Ordering::Relaxed) {
                    return Ok(LoadStatus::Cancelled);
                }
            }
        }
        Ok(LoadStatus::Complete)
    }

    /// Scan the head of the file and decide which dialect it speaks.
    fn sniff_dialect(&self, path: &Path) -> Result<Dialect, LoadError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut lines: Vec<Vec<u8>> = Vec::new();
        let mut non_comment = 0usize;
        let mut buf: Vec<u8> = Vec::new();
        while non_comment < 100 {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let mut line: &[u8] = &buf;
            while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if !is_comment(line) {
                non_comment += 1;
            }
            lines.push(line.to_vec());
        }
        detect_dialect(lines.iter().map(|l| l.as_slice())).ok_or(LoadError::UnknownDialect {
            lines_scanned: lines.len(),
        })
    }

    fn attach_backtrace(&mut self, line: &[u8]) {
        let trimmed: &[u8] = match line.iter().position(|&b| b != b' ' && b != b'\t') {
            Some(i) => &line[i..],
            None => return,
        };
        let r = self.pool.intern(trimmed);
        if let Some(ev) = self.events.last_mut() {
            ev.backtrace.get_or_insert_with(Vec::new).push(r);
        }
    }

    // -- The per-CPU state machines --

    fn apply(&mut self, idx: usize, ingest: &mut IngestState) -> Result<(), LoadError> {
        let ev = &self.events[idx];
        let t = ev.time;
        let cpu = ev.cpu;
        let pid = ev.pid;
        let name = ev.name;
        let payload = ev.payload;
        let kind = payload.kind();

        if cpu >= NR_CPUS_ALLOWED {
            return Err(LoadError::Internal(format!(
                "event {idx} carries cpu {cpu} past the tokenizer guard"
            )));
        }

        if self.events.len() == 1 {
            self.start_time = t;
            self.end_time = t;
        } else {
            self.start_time = self.start_time.min(t);
            self.end_time = self.end_time.max(t);
        }
        self.nr_cpus = self.nr_cpus.max(cpu + 1);

        self.touch_task(pid, Some(name), t);

        match payload {
            EventPayload::SchedSwitch(f) => self.apply_switch(idx, t, cpu, &f, ingest),
            EventPayload::SchedWakeup(f)
            | EventPayload::SchedWakeupNew(f)
            | EventPayload::SchedWaking(f) => self.apply_wake(idx, t, kind, &f, ingest),
            EventPayload::SchedMigrateTask(f) => {
                if f.orig_cpu >= NR_CPUS_ALLOWED || f.dest_cpu >= NR_CPUS_ALLOWED {
                    self.summary.cpu_range += 1;
                    return Ok(());
                }
                self.touch_task(f.pid, None, t);
                self.migrations.push(Migration {
                    pid: f.pid,
                    time: t,
                    orig_cpu: f.orig_cpu,
                    dest_cpu: f.dest_cpu,
                    event_idx: idx as u32,
                });
                self.nr_cpus = self.nr_cpus.max(f.dest_cpu + 1).max(f.orig_cpu + 1);
                // A pending wakeup follows the task to its new runqueue.
                if let Some(p) = ingest.cpu_mut(f.orig_cpu).pending.remove(&f.pid) {
                    ingest.cpu_mut(f.dest_cpu).pending.insert(f.pid, p);
                }
            }
            EventPayload::SchedProcessFork(f) => {
                self.touch_task(f.parent_pid, None, t);
                self.fork_task(&f, t, ingest);
            }
            EventPayload::SchedProcessExit(f) => {
                let tid = self.touch_task(f.pid, None, t);
                self.tasks[tid as usize].exit_time = Some(t);
            }
            EventPayload::CpuIdle(f) => {
                if f.cpu >= NR_CPUS_ALLOWED {
                    self.summary.cpu_range += 1;
                    return Ok(());
                }
                self.nr_cpus = self.nr_cpus.max(f.cpu + 1);
                series_mut(&mut self.cpu_idle, f.cpu).push_step(t.to_secs(), f.state as f64);
            }
            EventPayload::CpuFrequency(f) => {
                if f.cpu >= NR_CPUS_ALLOWED {
                    self.summary.cpu_range += 1;
                    return Ok(());
                }
                self.nr_cpus = self.nr_cpus.max(f.cpu + 1);
                series_mut(&mut self.cpu_freq, f.cpu).push_step(t.to_secs(), f.freq as f64);
            }
            EventPayload::Other => {}
        }
        Ok(())
    }

    fn apply_switch(
        &mut self,
        idx: usize,
        t: TraceTime,
        cpu: u32,
        f: &SchedSwitchFields,
        ingest: &mut IngestState,
    ) {
        self.touch_task(f.prev_pid, Some(f.prev_name), t);
        self.touch_task(f.next_pid, Some(f.next_name), t);

        // If the trace lost events, someone else may still be marked running
        // here; close that interval so the step function stays consistent.
        if let Some(stale) = ingest.cpu_mut(cpu).running.take() {
            if stale != f.prev_pid {
                let id = self.cpu_task_entry(stale, cpu);
                self.cpu_tasks[id as usize].push_sched(t.to_secs(), false);
            }
        }

        if f.prev_state.is_none() {
            self.summary.unknown_states += 1;
        }
        let secs = t.to_secs();
        let old_id = self.cpu_task_entry(f.prev_pid, cpu);
        {
            let ct = &mut self.cpu_tasks[old_id as usize];
            ct.push_sched(secs, false);
            match f.prev_state {
                None => {}
                Some(s) if s.preempted() => ct.push_preempted(secs),
                Some(s) if s.is_uninterruptible() => ct.push_uninterruptible(secs),
                Some(s) if s.is_runnable() => ct.push_running(secs),
                Some(_) => {}
            }
        }

        // A wakeup pending on this CPU for the incoming task resolves into a
        // scheduling-latency sample.
        if let Some(p) = ingest.cpu_mut(cpu).pending.remove(&f.next_pid) {
            let delay = t - p.time;
            if delay.is_negative() {
                self.summary.negative_delays += 1;
            } else {
                self.sched_latencies.push(Latency {
                    kind: LatencyKind::Sched,
                    pid: f.next_pid,
                    cpu,
                    runnable_idx: p.idx,
                    sched_idx: idx as u32,
                    delay,
                });
                let id = self.cpu_task_entry(f.next_pid, cpu);
                self.cpu_tasks[id as usize].push_delay(p.time.to_secs(), delay.to_secs());
            }
        }

        let new_id = self.cpu_task_entry(f.next_pid, cpu);
        self.cpu_tasks[new_id as usize].push_sched(secs, true);
        ingest.cpu_mut(cpu).running = Some(f.next_pid);
    }

    fn apply_wake(
        &mut self,
        idx: usize,
        t: TraceTime,
        kind: EventKind,
        f: &SchedWakeFields,
        ingest: &mut IngestState,
    ) {
        if f.target_cpu >= NR_CPUS_ALLOWED {
            self.summary.cpu_range += 1;
            return;
        }
        if f.prio.is_none() {
            self.summary.unresolved_prios += 1;
        }
        self.touch_task(f.pid, Some(f.name), t);
        self.nr_cpus = self.nr_cpus.max(f.target_cpu + 1);

        let wake = PendingWake {
            time: t,
            idx: idx as u32,
        };
        ingest.cpu_mut(f.target_cpu).pending.insert(f.pid, wake);

        if kind == EventKind::SchedWakeup {
            if let Some(w) = ingest.last_waking.remove(&f.pid) {
                let delay = t - w.time;
                if delay.is_negative() {
                    self.summary.negative_delays += 1;
                } else {
                    self.wakeup_latencies.push(Latency {
                        kind: LatencyKind::Wakeup,
                        pid: f.pid,
                        cpu: f.target_cpu,
                        runnable_idx: w.idx,
                        sched_idx: idx as u32,
                        delay,
                    });
                }
            }
        } else if kind == EventKind::SchedWaking {
            ingest.last_waking.insert(f.pid, wake);
        }
    }

    /// Create or update the task record for a fork's child. A fork naming a
    /// PID that already has a record means the kernel recycled it; the old
    /// record is closed at the fork timestamp and a ghost alias keeps the
    /// mapping honest.
    fn fork_task(&mut self, f: &SchedForkFields, t: TraceTime, ingest: &mut IngestState) {
        if let Some(&old_tid) = self.task_ids.get(&f.child_pid) {
            let (generation, was_alive) = {
                let old = &self.tasks[old_tid as usize];
                (old.generation + 1, old.exit_time.is_none())
            };
            if was_alive {
                self.tasks[old_tid as usize].exit_time = Some(t);
            }
            // The old record keeps its timelines; new events for the PID must
            // not land on them.
            let stale: Vec<CpuTaskId> = self.tasks[old_tid as usize].cpu_tasks.clone();
            for ctid in stale {
                let cpu = self.cpu_tasks[ctid as usize].cpu;
                self.cpu_task_ids.remove(&(cpu, f.child_pid));
            }
            ingest.forget_pid(f.child_pid);

            let new_tid = self.tasks.len() as TaskId;
            let mut tsk = Task::new(f.child_pid, t, self.color_for(f.child_pid));
            tsk.name = Some(f.child_name);
            tsk.generation = generation;
            tsk.forked = true;
            self.tasks.push(tsk);
            self.task_ids.insert(f.child_pid, new_tid);
            self.ghost_aliases.push(GhostAlias {
                pid: f.child_pid,
                prior: old_tid,
                canonical: new_tid,
            });
        } else {
            let tid = self.touch_task(f.child_pid, Some(f.child_name), t);
            self.tasks[tid as usize].forked = true;
        }
    }

    fn color_for(&self, pid: i32) -> task::TaskColor {
        self.state
            .colors
            .get(&pid)
            .copied()
            .unwrap_or_else(|| default_color(pid))
    }

    /// Get or create the task record for `pid`, optionally supplying a name.
    /// The first observed name sticks.
    fn touch_task(&mut self, pid: i32, name: Option<StrRef>, t: TraceTime) -> TaskId {
        let tid = match self.task_ids.get(&pid) {
            Some(&tid) => tid,
            None => {
                let tid = self.tasks.len() as TaskId;
                self.tasks.push(Task::new(pid, t, self.color_for(pid)));
                self.task_ids.insert(pid, tid);
                tid
            }
        };
        let tsk = &mut self.tasks[tid as usize];
        if tsk.name.is_none() {
            tsk.name = name;
        }
        tsk.first_seen = tsk.first_seen.min(t);
        tid
    }

    fn cpu_task_entry(&mut self, pid: i32, cpu: u32) -> CpuTaskId {
        if let Some(&id) = self.cpu_task_ids.get(&(cpu, pid)) {
            return id;
        }
        let id = self.cpu_tasks.len() as CpuTaskId;
        self.cpu_tasks.push(CpuTask::new(pid, cpu));
        self.cpu_task_ids.insert((cpu, pid), id);
        let tid = match self.task_ids.get(&pid) {
            Some(&tid) => tid,
            None => self.touch_task(pid, None, TraceTime::ZERO),
        };
        self.tasks[tid as usize].cpu_tasks.push(id);
        id
    }

    fn finalize(&mut self) {
        let cpus = self.nr_cpus as usize;
        if self.cpu_freq.len() < cpus {
            self.cpu_freq.resize_with(cpus, CpuSeries::default);
        }
        if self.cpu_idle.len() < cpus {
            self.cpu_idle.resize_with(cpus, CpuSeries::default);
        }
        info!(
            "loaded {} events on {} cpus, {} tasks, {} sched / {} wakeup latency samples",
            self.events.len(),
            self.nr_cpus,
            self.tasks.len(),
            self.sched_latencies.len(),
            self.wakeup_latencies.len()
        );
        if self.summary.has_warnings() {
            warn!(
                "trace had problems: {} unparsed lines, {} name overflows, \
                 {} unknown sleep states, {} unresolved priorities, \
                 {} out-of-range cpus, {} out-of-order delays",
                self.summary.unparsed,
                self.summary.name_overflows,
                self.summary.unknown_states,
                self.summary.unresolved_prios,
                self.summary.cpu_range,
                self.summary.negative_delays
            );
        }
    }

    // -- Read access for the plotter and the CLI --

    pub fn pool(&self) -> &StringPool {
        &self.pool
    }

    pub fn summary(&self) -> &LoadSummary {
        &self.summary
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    pub fn time_precision(&self) -> u8 {
        self.time_precision.unwrap_or(0)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task_by_pid(&self, pid: i32) -> Option<&Task> {
        self.task_ids.get(&pid).map(|&tid| &self.tasks[tid as usize])
    }

    pub fn cpu_tasks(&self) -> &[CpuTask] {
        &self.cpu_tasks
    }

    pub fn cpu_task(&self, pid: i32, cpu: u32) -> Option<&CpuTask> {
        self.cpu_task_ids
            .get(&(cpu, pid))
            .map(|&id| &self.cpu_tasks[id as usize])
    }

    /// All timeline tracks on one CPU.
    pub fn cpu_tasks_on(&self, cpu: u32) -> impl Iterator<Item = &CpuTask> {
        self.cpu_tasks.iter().filter(move |ct| ct.cpu == cpu)
    }

    /// The filtered index vector, absent when no filter is enabled.
    pub fn filtered_events(&self) -> Option<&[u32]> {
        self.filter.filtered.as_deref()
    }

    /// Recolor a task; the override persists through the state file.
    pub fn set_task_color(&mut self, pid: i32, color: task::TaskColor) {
        if let Some(&tid) = self.task_ids.get(&pid) {
            self.tasks[tid as usize].color = color;
        }
        self.state.colors.insert(pid, color);
    }

    // -- Filters (thin wrappers so callers don't juggle the borrows) --

    pub fn create_pid_filter(
        &mut self,
        pids: std::collections::HashSet<i32>,
        or_logic: bool,
        inclusive: bool,
    ) {
        self.filter
            .create_pid_filter(&self.events, &self.pool, pids, or_logic, inclusive);
    }

    pub fn create_cpu_filter(&mut self, cpus: std::collections::HashSet<u32>, or_logic: bool) {
        self.filter
            .create_cpu_filter(&self.events, &self.pool, cpus, or_logic);
    }

    pub fn create_event_filter(
        &mut self,
        kinds: std::collections::HashSet<EventKind>,
        or_logic: bool,
    ) {
        self.filter
            .create_event_filter(&self.events, &self.pool, kinds, or_logic);
    }

    pub fn create_regex_filter(
        &mut self,
        patterns: &[String],
        or_logic: bool,
    ) -> Result<(), crate::filter::FilterError> {
        self.filter
            .create_regex_filter(&self.events, &self.pool, patterns, or_logic)
    }

    pub fn disable_filter(&mut self, kind: crate::filter::FilterKind) {
        self.filter.disable_filter(&self.events, &self.pool, kind);
    }

    pub fn disable_all_filters(&mut self) {
        self.filter.disable_all_filters();
    }

    // -- Latency queries --

    pub fn find_next_sched_sleep_event(&self, t0: TraceTime, pid: i32) -> Option<usize> {
        find_next_sched_sleep_event(&self.events, t0, pid)
    }

    pub fn find_previous_wake_event(
        &self,
        sched_idx: usize,
        pid: i32,
        kind: EventKind,
    ) -> Option<usize> {
        find_previous_wake_event(&self.events, sched_idx, pid, kind)
    }

    // -- Time-limited statistics --

    /// Tally on-CPU time per PID inside `[lo, hi]`, without touching the
    /// filter vector. Driven by cursor positions in the UI.
    pub fn stats_time_limited(&self, lo: TraceTime, hi: TraceTime) -> Vec<TaskStat> {
        let mut running: HashMap<u32, (i32, TraceTime)> = HashMap::new();
        let mut on_cpu: HashMap<i32, i64> = HashMap::new();

        let mut credit = |on_cpu: &mut HashMap<i32, i64>, pid: i32, from: TraceTime, to: TraceTime| {
            let from = from.max(lo);
            let to = to.min(hi);
            if to > from {
                *on_cpu.entry(pid).or_insert(0) += (to - from).as_ns();
            }
        };

        for ev in &self.events {
            if ev.time > hi {
                break;
            }
            if let EventPayload::SchedSwitch(f) = &ev.payload {
                if let Some((pid, since)) = running.insert(ev.cpu, (f.next_pid, ev.time)) {
                    credit(&mut on_cpu, pid, since, ev.time);
                }
            }
        }
        for (_cpu, (pid, since)) in running {
            credit(&mut on_cpu, pid, since, hi);
        }

        let mut stats: Vec<TaskStat> = on_cpu
            .into_iter()
            .map(|(pid, ns)| TaskStat {
                pid,
                name: self
                    .task_by_pid(pid)
                    .map(|t| t.display_name(&self.pool))
                    .unwrap_or_else(|| format!("<{pid}>")),
                on_cpu: TraceTime::from_ns(ns),
            })
            .collect();
        stats.sort_by(|a, b| b.on_cpu.cmp(&a.on_cpu).then(a.pid.cmp(&b.pid)));
        stats
    }
}

impl Default for TraceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn series_mut(series: &mut Vec<CpuSeries>, cpu: u32) -> &mut CpuSeries {
    let cpu = cpu as usize;
    if series.len() <= cpu {
        series.resize_with(cpu + 1, CpuSeries::default);
    }
    &mut series[cpu]
}
