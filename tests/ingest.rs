//! End-to-end ingestion tests.
//!
//! These write synthetic traces to disk, run them through the full pipeline
//! and check the model invariants: event bounds, step-function shape,
//! latency bookkeeping and filter behavior. The CLI binary is exercised at
//! the bottom against the same traces.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use tracelens::analyze::task::{SCHED_OFF, SCHED_ON};
use tracelens::event::EventPayload;
use tracelens::{Dialect, EventKind, LoadStatus, TraceAnalyzer, TraceTime};

/// An ftrace-dialect trace covering two CPUs: wakeups, switches, a fork, a
/// migration that carries a pending wakeup across CPUs, frequency/idle
/// events, an exit, and one garbage line.
const FTRACE_TRACE: &str = "\
# tracer: nop
#
<idle>-0 [000] d..2 100.000100: cpu_idle: state=4294967295 cpu_id=0
<idle>-0 [000] d..2 100.000200: sched_waking: comm=kworker/0:1 pid=5 prio=120 target_cpu=000
<idle>-0 [000] d..2 100.000250: sched_wakeup: kworker/0:1:5 [120] CPU:0
<idle>-0 [000] d..2 100.000300: sched_switch: prev_comm=swapper/0 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=kworker/0:1 next_pid=5 next_prio=120
kworker/0:1-5 [000] d..2 100.000800: sched_waking: comm=bash pid=42 prio=120 target_cpu=001
<idle>-0 [001] d..2 100.000900: sched_wakeup: bash:42 [120] CPU:1
<idle>-0 [001] d..2 100.001000: sched_switch: prev_comm=swapper/1 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=bash next_pid=42 next_prio=120
bash-42 [001] d..2 100.002000: sched_process_fork: comm=bash pid=42 child_comm=child child_pid=99
bash-42 [001] d..2 100.002200: sched_wakeup_new: child:99 [120] CPU:1
bash-42 [001] d..2 100.002500: sched_migrate_task: comm=child pid=99 prio=120 orig_cpu=1 dest_cpu=0
bash-42 [001] d..3 100.003000: sched_switch: prev_comm=bash prev_pid=42 prev_prio=120 prev_state=D ==> next_comm=swapper/1 next_pid=0 next_prio=120
kworker/0:1-5 [000] d..2 100.004000: sched_switch: prev_comm=kworker/0:1 prev_pid=5 prev_prio=120 prev_state=S ==> next_comm=swapper/0 next_pid=0 next_prio=120
<idle>-0 [000] d..2 100.004500: sched_switch: prev_comm=swapper/0 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=child next_pid=99 next_prio=120
<idle>-0 [000] d..2 100.005000: cpu_frequency: state=2400000 cpu_id=0
child-99 [000] d..2 100.006000: sched_switch: prev_comm=child prev_pid=99 prev_prio=120 prev_state=R+ ==> next_comm=swapper/0 next_pid=0 next_prio=120
child-99 [000] d..2 100.006500: sched_process_exit: comm=child pid=99 prio=120
garbage line that will not parse
";

/// A perf-script-dialect trace with backtraces.
const PERF_TRACE: &str = "\
swapper   0 [000] 200.000100: sched:sched_waking: comm=bash pid=42 prio=120 target_cpu=000
swapper   0 [000] 200.000200: sched:sched_wakeup: bash:42 [120] CPU:0
\tffffffff810b try_to_wake_up+0x1 ([kernel.kallsyms])
\tffffffff811c schedule+0x2 ([kernel.kallsyms])

swapper   0 [000] 200.000300: sched:sched_switch: prev_comm=swapper/0 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=bash next_pid=42 next_prio=120
";

fn write_trace(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("trace.txt");
    fs::write(&path, content).expect("failed to write trace");
    (dir, path)
}

fn load(content: &str) -> (TraceAnalyzer, TempDir) {
    let (dir, path) = write_trace(content);
    let mut analyzer = TraceAnalyzer::new();
    assert_eq!(analyzer.open(&path).unwrap(), LoadStatus::Complete);
    (analyzer, dir)
}

/// The model invariants every loaded trace must satisfy.
fn check_invariants(an: &TraceAnalyzer) {
    let start = an.start_time.to_secs();
    let end = an.end_time.to_secs();

    for ev in &an.events {
        assert!(ev.time >= an.start_time && ev.time <= an.end_time);
    }

    for ct in an.cpu_tasks() {
        assert_eq!(ct.sched_timev.len(), ct.sched_data.len());
        for w in ct.sched_timev.windows(2) {
            assert!(w[0] <= w[1], "sched_timev not sorted for pid {}", ct.pid);
        }
        for w in ct.sched_data.windows(2) {
            assert_ne!(w[0], w[1], "sched_data does not alternate for pid {}", ct.pid);
        }
        for &v in &ct.sched_data {
            assert!(v == SCHED_ON || v == SCHED_OFF);
        }
        let in_bounds = |t: f64| t >= start - 1e-9 && t <= end + 1e-9;
        assert!(ct.sched_timev.iter().copied().all(in_bounds));
        assert!(ct.running_timev.iter().copied().all(in_bounds));
        assert!(ct.preempted_timev.iter().copied().all(in_bounds));
        assert!(ct.uninterruptible_timev.iter().copied().all(in_bounds));
        for i in 0..ct.delay.len() {
            assert!(ct.delay[i] >= 0.0);
            assert!(in_bounds(ct.delay_timev[i] + ct.delay[i]));
        }
    }

    for lat in an.sched_latencies.iter().chain(&an.wakeup_latencies) {
        assert!(lat.delay >= TraceTime::ZERO);
        let runnable = &an.events[lat.runnable_idx as usize];
        let resolved = &an.events[lat.sched_idx as usize];
        assert_eq!(resolved.time - runnable.time, lat.delay);
        match &runnable.payload {
            EventPayload::SchedWakeup(f)
            | EventPayload::SchedWakeupNew(f)
            | EventPayload::SchedWaking(f) => assert_eq!(f.pid, lat.pid),
            other => panic!("runnable_idx points at a non-wake event: {other:?}"),
        }
    }
    for lat in &an.sched_latencies {
        match &an.events[lat.sched_idx as usize].payload {
            EventPayload::SchedSwitch(f) => assert_eq!(f.next_pid, lat.pid),
            other => panic!("sched_idx points at a non-switch event: {other:?}"),
        }
    }
}

#[test]
fn test_ftrace_full_pipeline() {
    let (an, _dir) = load(FTRACE_TRACE);

    assert_eq!(an.dialect(), Some(Dialect::Ftrace));
    assert_eq!(an.events.len(), 16);
    assert_eq!(an.summary().unparsed, 1);
    assert_eq!(an.nr_cpus, 2);
    assert_eq!(an.time_precision(), 6);
    assert_eq!(an.start_time.as_ns(), 100_000_100_000);
    assert_eq!(an.end_time.as_ns(), 100_006_500_000);

    // idle + kworker + bash + child
    assert_eq!(an.tasks().len(), 4);
    assert!(an.task_by_pid(99).unwrap().forked);
    assert!(an.task_by_pid(99).unwrap().exit_time.is_some());

    check_invariants(&an);
}

#[test]
fn test_ftrace_latency_lists() {
    let (an, _dir) = load(FTRACE_TRACE);

    // kworker 50us, bash 100us, child 2300us (wakeup_new on cpu 1, migrated
    // to cpu 0, scheduled there).
    assert_eq!(an.sched_latencies.len(), 3);
    let by_pid = |pid: i32| {
        an.sched_latencies
            .iter()
            .find(|l| l.pid == pid)
            .unwrap_or_else(|| panic!("no sched latency for pid {pid}"))
    };
    assert_eq!(by_pid(5).delay.as_ns(), 50_000);
    assert_eq!(by_pid(42).delay.as_ns(), 100_000);
    let child = by_pid(99);
    assert_eq!(child.delay.as_ns(), 2_300_000);
    assert_eq!(child.cpu, 0);
    assert_eq!(an.events[child.runnable_idx as usize].kind(), EventKind::SchedWakeupNew);

    // waking -> wakeup for kworker and bash.
    assert_eq!(an.wakeup_latencies.len(), 2);
    assert_eq!(an.wakeup_latencies[0].delay.as_ns(), 50_000);
    assert_eq!(an.wakeup_latencies[1].delay.as_ns(), 100_000);

    assert_eq!(an.migrations.len(), 1);
    assert_eq!(an.migrations[0].pid, 99);
}

#[test]
fn test_ftrace_timelines_and_series() {
    let (an, _dir) = load(FTRACE_TRACE);

    let kworker = an.cpu_task(5, 0).unwrap();
    assert_eq!(kworker.sched_data, vec![SCHED_ON, SCHED_OFF]);
    assert_eq!(kworker.delay.len(), 1);

    // child got preempted (R+) when switched out.
    let child = an.cpu_task(99, 0).unwrap();
    assert_eq!(child.preempted_timev.len(), 1);
    assert!(child.uninterruptible_timev.is_empty());

    // bash slept uninterruptibly on cpu 1.
    let bash = an.cpu_task(42, 1).unwrap();
    assert_eq!(bash.uninterruptible_timev.len(), 1);

    assert_eq!(an.cpu_idle[0].data, vec![-1.0]);
    assert_eq!(an.cpu_freq[0].data, vec![2_400_000.0]);
    assert!(an.cpu_freq[1].data.is_empty());
}

#[test]
fn test_perf_dialect_and_backtraces() {
    let (an, _dir) = load(PERF_TRACE);

    assert_eq!(an.dialect(), Some(Dialect::Perf));
    assert_eq!(an.events.len(), 3);
    let bt = an.events[1].backtrace.as_ref().expect("wakeup has a backtrace");
    assert_eq!(bt.len(), 2);
    assert!(an.pool().get(bt[0]).starts_with(b"ffffffff810b"));
    assert!(an.events[0].backtrace.is_none());

    assert_eq!(an.wakeup_latencies.len(), 1);
    assert_eq!(an.sched_latencies.len(), 1);
    check_invariants(&an);
}

#[test]
fn test_filters_on_loaded_store() {
    let (mut an, _dir) = load(FTRACE_TRACE);

    // Inclusive pid filter: only lines attributed to bash.
    an.create_pid_filter(HashSet::from([42]), false, true);
    let bash_only = an.filtered_events().unwrap().to_vec();
    assert!(!bash_only.is_empty());
    for &idx in &bash_only {
        assert_eq!(an.events[idx as usize].pid, 42);
    }
    for w in bash_only.windows(2) {
        assert!(w[0] < w[1]);
    }

    // Same parameters give the same result.
    an.create_pid_filter(HashSet::from([42]), false, true);
    assert_eq!(an.filtered_events().unwrap(), &bash_only[..]);

    // Filter order does not matter.
    an.disable_all_filters();
    an.create_pid_filter(HashSet::from([42, 0]), false, true);
    an.create_cpu_filter(HashSet::from([1]), false);
    let pid_then_cpu = an.filtered_events().unwrap().to_vec();
    an.disable_all_filters();
    an.create_cpu_filter(HashSet::from([1]), false);
    an.create_pid_filter(HashSet::from([42, 0]), false, true);
    assert_eq!(an.filtered_events().unwrap(), &pid_then_cpu[..]);

    // Event-kind and regex predicates stack on top.
    an.disable_all_filters();
    an.create_event_filter(HashSet::from([EventKind::SchedSwitch]), false);
    an.create_regex_filter(&["next_comm=child".to_string()], false)
        .unwrap();
    let filtered = an.filtered_events().unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(an.events[filtered[0] as usize].kind(), EventKind::SchedSwitch);

    an.disable_all_filters();
    assert!(an.filtered_events().is_none());
}

#[test]
fn test_event_indices_stable_across_filters() {
    let (mut an, _dir) = load(FTRACE_TRACE);
    let lat = an.sched_latencies[0];
    let runnable_time = an.events[lat.runnable_idx as usize].time;
    an.create_pid_filter(HashSet::from([42]), false, true);
    an.create_cpu_filter(HashSet::from([0]), false);
    assert_eq!(an.events[lat.runnable_idx as usize].time, runnable_time);
}

#[test]
fn test_latency_queries_against_store() {
    let (an, _dir) = load(FTRACE_TRACE);

    // First sleepy switch-out of the kworker after trace start.
    let idx = an
        .find_next_sched_sleep_event(an.start_time, 5)
        .expect("kworker goes to sleep");
    match &an.events[idx].payload {
        EventPayload::SchedSwitch(f) => {
            assert_eq!(f.prev_pid, 5);
            assert!(!f.prev_state.unwrap().is_runnable());
        }
        other => panic!("expected a switch, got {other:?}"),
    }

    // The wakeup that preceded it.
    let wake = an
        .find_previous_wake_event(idx, 5, EventKind::SchedWakeup)
        .expect("kworker was woken before sleeping");
    assert!(wake < idx);
    assert_eq!(an.events[wake].kind(), EventKind::SchedWakeup);
}

#[test]
fn test_stats_window_against_full_trace() {
    let (an, _dir) = load(FTRACE_TRACE);
    let stats = an.stats_time_limited(an.start_time, an.end_time);
    // kworker ran 0.0037s on cpu 0 (100.000300 to 100.004000).
    let kworker = stats.iter().find(|s| s.pid == 5).unwrap();
    assert_eq!(kworker.on_cpu.as_ns(), 3_700_000);
    // bash ran 0.002s on cpu 1 (100.001000 to 100.003000).
    let bash = stats.iter().find(|s| s.pid == 42).unwrap();
    assert_eq!(bash.on_cpu.as_ns(), 2_000_000);
}

// ---------------------------------------------------------------------------
// CLI binary
// ---------------------------------------------------------------------------

fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tracelens"))
        .args(args)
        .output()
        .expect("failed to run tracelens")
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

fn cli_trace() -> (TempDir, PathBuf) {
    write_trace(FTRACE_TRACE)
}

#[test]
fn test_cli_report_table() {
    let (_dir, path) = cli_trace();
    let out = run_cli(&["report", "-f", path.to_str().unwrap()]);
    assert!(out.status.success(), "report failed: {}", lossy(&out.stderr));
    let stdout = lossy(&out.stdout);
    assert!(stdout.contains("events: 16"), "unexpected output: {stdout}");
    assert!(stdout.contains("cpus: 2"));
    assert!(stdout.contains("unparsed: 1"));
}

#[test]
fn test_cli_report_json_with_filter() {
    let (_dir, path) = cli_trace();
    let out = run_cli(&[
        "report",
        "-f",
        path.to_str().unwrap(),
        "--pid",
        "42",
        "--format",
        "json",
    ]);
    assert!(out.status.success(), "report failed: {}", lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("valid json");
    assert_eq!(v["events"], 16);
    assert_eq!(v["dialect"], "Ftrace");
    assert!(v["filtered_events"].as_u64().unwrap() < 16);
}

#[test]
fn test_cli_latency_table() {
    let (_dir, path) = cli_trace();
    let out = run_cli(&["latency", "-f", path.to_str().unwrap(), "--kind", "sched"]);
    assert!(out.status.success(), "latency failed: {}", lossy(&out.stderr));
    let stdout = lossy(&out.stdout);
    // The worst sample is the migrated child at 2300us.
    let first_row = stdout.lines().nth(1).expect("at least one sample");
    assert!(first_row.contains("child"), "unexpected row: {first_row}");
    assert!(first_row.contains("2300.0"), "unexpected row: {first_row}");
}

#[test]
fn test_cli_latency_bad_kind() {
    let (_dir, path) = cli_trace();
    let out = run_cli(&["latency", "-f", path.to_str().unwrap(), "--kind", "nope"]);
    assert!(!out.status.success());
    assert!(lossy(&out.stderr).contains("unknown latency kind"));
}

#[test]
fn test_cli_tasks_window() {
    let (_dir, path) = cli_trace();
    let out = run_cli(&[
        "tasks",
        "-f",
        path.to_str().unwrap(),
        "--start",
        "100.000300",
        "--end",
        "100.004000",
        "--format",
        "csv",
    ]);
    assert!(out.status.success(), "tasks failed: {}", lossy(&out.stderr));
    let stdout = lossy(&out.stdout);
    assert!(stdout.lines().next().unwrap().starts_with("pid,task,on_cpu_s"));
    let kworker = stdout
        .lines()
        .find(|l| l.contains("kworker"))
        .expect("kworker listed");
    assert!(kworker.starts_with("5,"), "unexpected row: {kworker}");
}

#[test]
fn test_cli_rejects_unknown_dialect() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notatrace.txt");
    fs::write(&path, "hello\nworld\n").unwrap();
    let out = run_cli(&["report", "-f", path.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(lossy(&out.stderr).contains("unsupported trace dialect"));
}

#[test]
fn test_state_file_color_survives_reload() {
    let (_dir, path) = cli_trace();
    let state_path = tracelens::statefile::StateFile::path_for(Path::new(path.to_str().unwrap()));
    fs::write(&state_path, "color.42=112233\n").unwrap();

    let mut an = TraceAnalyzer::new();
    an.open(&path).unwrap();
    let bash = an.task_by_pid(42).unwrap();
    assert_eq!(bash.color.to_hex(), "112233");
}
