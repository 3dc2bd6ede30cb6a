//! tracelens library - trace ingestion and analysis for the tracelens CLI.
//!
//! This library turns textual kernel scheduling traces (ftrace tracer output
//! and perf script output) into an in-memory model for interactive
//! visualization and reporting.
//!
//! # Modules
//!
//! - [`pool`] - string interning arena shared by all upper layers
//! - [`time`] - fixed-point trace timestamps
//! - [`tokenizer`] - event-line tokenization and dialect detection
//! - [`params`] - `prefix=value` / `[value]` argument extractors
//! - [`parse`] - per-event-family parsers
//! - [`event`] - normalized event records
//! - [`analyze`] - the ingestion driver and per-CPU state reconstruction
//! - [`filter`] - stacked event filtering
//! - [`statefile`] - per-trace persisted user state
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use tracelens::TraceAnalyzer;
//!
//! let mut analyzer = TraceAnalyzer::new();
//! analyzer.open(Path::new("./trace.txt")).expect("load failed");
//! for lat in &analyzer.sched_latencies {
//!     println!("pid {} waited {}", lat.pid, lat.delay);
//! }
//! ```

pub mod analyze;
pub mod event;
pub mod filter;
pub mod params;
pub mod parse;
pub mod pool;
pub mod statefile;
pub mod time;
pub mod tokenizer;

// Re-export for convenience
pub use analyze::latency::{Latency, LatencyKind};
pub use analyze::task::{CpuTask, Task, TaskColor};
pub use analyze::{
    LoadControl, LoadError, LoadStatus, LoadSummary, TaskStat, TraceAnalyzer,
};
pub use event::{EventKind, TraceEvent};
pub use filter::{FilterEngine, FilterError, FilterKind};
pub use pool::{StrRef, StringPool};
pub use time::TraceTime;
pub use tokenizer::Dialect;
