//! Per-trace persisted user state.
//!
//! A small key/value text file stored next to the trace (`<trace>.tlstate`)
//! holding task color overrides, the last window geometry and the last
//! filter parameters. It is read before analysis starts so colors can be
//! applied as tasks are created, and written back when the trace is closed.
//! A missing or damaged file is never fatal.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::analyze::task::TaskColor;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateFile {
    pub colors: HashMap<i32, TaskColor>,
    pub geometry: Option<(u32, u32)>,
    pub filter_pids: Vec<i32>,
    pub filter_cpus: Vec<u32>,
}

impl StateFile {
    pub fn path_for(trace: &Path) -> PathBuf {
        let mut os = trace.as_os_str().to_os_string();
        os.push(".tlstate");
        PathBuf::from(os)
    }

    /// Load the state for `trace`. Absence is normal; anything else that
    /// goes wrong degrades to defaults with a warning.
    pub fn load(trace: &Path) -> StateFile {
        let path = Self::path_for(trace);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return StateFile::default(),
            Err(e) => {
                warn!("cannot read state file {}: {e}", path.display());
                return StateFile::default();
            }
        };
        Self::parse(&text, &path)
    }

    fn parse(text: &str, path: &Path) -> StateFile {
        let mut state = StateFile::default();
        let mut bad_lines = 0usize;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bad_lines += 1;
                continue;
            };
            if let Some(pid) = key.strip_prefix("color.") {
                match (pid.parse::<i32>(), TaskColor::from_hex(value)) {
                    (Ok(pid), Some(color)) => {
                        state.colors.insert(pid, color);
                    }
                    _ => bad_lines += 1,
                }
            } else if key == "geometry" {
                match value.split_once('x') {
                    Some((w, h)) => match (w.parse(), h.parse()) {
                        (Ok(w), Ok(h)) => state.geometry = Some((w, h)),
                        _ => bad_lines += 1,
                    },
                    None => bad_lines += 1,
                }
            } else if key == "filter.pids" {
                match parse_list(value) {
                    Some(pids) => state.filter_pids = pids,
                    None => bad_lines += 1,
                }
            } else if key == "filter.cpus" {
                match parse_list(value) {
                    Some(cpus) => state.filter_cpus = cpus,
                    None => bad_lines += 1,
                }
            }
            // Unknown keys are ignored so newer versions can add entries.
        }
        if bad_lines > 0 {
            warn!(
                "state file {} has {bad_lines} unreadable entries, using defaults for them",
                path.display()
            );
        }
        state
    }

    pub fn save(&self, trace: &Path) -> io::Result<()> {
        let path = Self::path_for(trace);
        let mut out = String::new();
        if let Some((w, h)) = self.geometry {
            let _ = writeln!(out, "geometry={w}x{h}");
        }
        let mut pids: Vec<i32> = self.colors.keys().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            let _ = writeln!(out, "color.{pid}={}", self.colors[&pid].to_hex());
        }
        if !self.filter_pids.is_empty() {
            let _ = writeln!(out, "filter.pids={}", join_list(&self.filter_pids));
        }
        if !self.filter_cpus.is_empty() {
            let _ = writeln!(out, "filter.cpus={}", join_list(&self.filter_cpus));
        }
        fs::write(path, out)
    }
}

fn parse_list<T: std::str::FromStr>(value: &str) -> Option<Vec<T>> {
    if value.is_empty() {
        return Some(Vec::new());
    }
    value.split(',').map(|v| v.trim().parse().ok()).collect()
}

fn join_list<T: std::fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
