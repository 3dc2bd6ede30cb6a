//! Stacked event filtering.
//!
//! Predicates are enabled one kind at a time and combined over the event
//! store in a single linear pass, producing an ascending index vector that
//! consumers iterate in place of the full store. The store itself is never
//! touched, so event indices stay stable across filter changes.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;

use crate::event::{EventKind, TraceEvent};
use crate::pool::StringPool;

/// The predicate kinds the engine can stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Pid,
    Cpu,
    Event,
    Regex,
}

/// A regex pattern that failed to compile. The predicate stays disabled.
#[derive(Debug)]
pub struct FilterError {
    pub pattern: String,
    pub source: regex::Error,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad filter pattern {:?}: {}", self.pattern, self.source)
    }
}

impl std::error::Error for FilterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Debug)]
struct PidFilter {
    pids: HashSet<i32>,
    inclusive: bool,
    or_logic: bool,
}

#[derive(Debug)]
struct CpuFilter {
    cpus: HashSet<u32>,
    or_logic: bool,
}

#[derive(Debug)]
struct EventFilter {
    kinds: HashSet<EventKind>,
    or_logic: bool,
}

struct RegexFilter {
    patterns: Vec<Regex>,
    or_logic: bool,
}

#[derive(Default)]
pub struct FilterEngine {
    pid: Option<PidFilter>,
    cpu: Option<CpuFilter>,
    event: Option<EventFilter>,
    regex: Option<RegexFilter>,
    /// Ascending indices into the event store, absent when no predicate is
    /// enabled.
    pub filtered: Option<Vec<u32>>,
}

impl FilterEngine {
    pub fn new() -> Self {
        FilterEngine::default()
    }

    pub fn is_enabled(&self, kind: FilterKind) -> bool {
        match kind {
            FilterKind::Pid => self.pid.is_some(),
            FilterKind::Cpu => self.cpu.is_some(),
            FilterKind::Event => self.event.is_some(),
            FilterKind::Regex => self.regex.is_some(),
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.pid.is_some() || self.cpu.is_some() || self.event.is_some() || self.regex.is_some()
    }

    /// Pids the pid predicate currently names, for persisting.
    pub fn pid_filter_pids(&self) -> Option<Vec<i32>> {
        self.pid.as_ref().map(|f| {
            let mut v: Vec<i32> = f.pids.iter().copied().collect();
            v.sort_unstable();
            v
        })
    }

    pub fn cpu_filter_cpus(&self) -> Option<Vec<u32>> {
        self.cpu.as_ref().map(|f| {
            let mut v: Vec<u32> = f.cpus.iter().copied().collect();
            v.sort_unstable();
            v
        })
    }

    pub fn create_pid_filter(
        &mut self,
        events: &[TraceEvent],
        pool: &StringPool,
        pids: HashSet<i32>,
        or_logic: bool,
        inclusive: bool,
    ) {
        self.pid = Some(PidFilter {
            pids,
            inclusive,
            or_logic,
        });
        self.rebuild(events, pool);
    }

    pub fn create_cpu_filter(
        &mut self,
        events: &[TraceEvent],
        pool: &StringPool,
        cpus: HashSet<u32>,
        or_logic: bool,
    ) {
        self.cpu = Some(CpuFilter { cpus, or_logic });
        self.rebuild(events, pool);
    }

    pub fn create_event_filter(
        &mut self,
        events: &[TraceEvent],
        pool: &StringPool,
        kinds: HashSet<EventKind>,
        or_logic: bool,
    ) {
        self.event = Some(EventFilter { kinds, or_logic });
        self.rebuild(events, pool);
    }

    /// Compile and enable the regex predicate. On a compile error the
    /// predicate keeps its previous state.
    pub fn create_regex_filter(
        &mut self,
        events: &[TraceEvent],
        pool: &StringPool,
        patterns: &[String],
        or_logic: bool,
    ) -> Result<(), FilterError> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for p in patterns {
            match Regex::new(p) {
                Ok(re) => compiled.push(re),
                Err(source) => {
                    return Err(FilterError {
                        pattern: p.clone(),
                        source,
                    });
                }
            }
        }
        self.regex = Some(RegexFilter {
            patterns: compiled,
            or_logic,
        });
        self.rebuild(events, pool);
        Ok(())
    }

    pub fn disable_filter(&mut self, events: &[TraceEvent], pool: &StringPool, kind: FilterKind) {
        match kind {
            FilterKind::Pid => self.pid = None,
            FilterKind::Cpu => self.cpu = None,
            FilterKind::Event => self.event = None,
            FilterKind::Regex => self.regex = None,
        }
        if self.any_enabled() {
            self.rebuild(events, pool);
        } else {
            self.filtered = None;
        }
    }

    pub fn disable_all_filters(&mut self) {
        self.pid = None;
        self.cpu = None;
        self.event = None;
        self.regex = None;
        self.filtered = None;
    }

    /// One linear pass over the store. Predicates without the `or_logic`
    /// flag are AND'ed; any `or_logic` predicate that matches lets the event
    /// through regardless of the conjunction.
    fn rebuild(&mut self, events: &[TraceEvent], pool: &StringPool) {
        let mut out = Vec::new();
        let mut argbuf = String::new();
        for (idx, ev) in events.iter().enumerate() {
            let mut and_ok = true;
            let mut has_and = false;
            let mut or_hit = false;
            let mut has_or = false;
            let mut tally = |matched: bool, or_logic: bool| {
                if or_logic {
                    has_or = true;
                    or_hit |= matched;
                } else {
                    has_and = true;
                    and_ok &= matched;
                }
            };

            if let Some(f) = &self.pid {
                tally(f.pids.contains(&ev.pid) == f.inclusive, f.or_logic);
            }
            if let Some(f) = &self.cpu {
                tally(f.cpus.contains(&ev.cpu), f.or_logic);
            }
            if let Some(f) = &self.event {
                tally(f.kinds.contains(&ev.kind()), f.or_logic);
            }
            if let Some(f) = &self.regex {
                argbuf.clear();
                for (n, r) in ev.argv.iter().enumerate() {
                    if n > 0 {
                        argbuf.push(' ');
                    }
                    argbuf.push_str(&pool.lossy(*r));
                }
                let matched = f.patterns.iter().all(|re| re.is_match(&argbuf));
                tally(matched, f.or_logic);
            }

            let include = if has_and {
                and_ok || or_hit
            } else if has_or {
                or_hit
            } else {
                true
            };
            if include {
                out.push(idx as u32);
            }
        }
        self.filtered = Some(out);
    }
}
