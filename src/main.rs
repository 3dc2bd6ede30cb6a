//! tracelens: inspect kernel scheduling traces from the command line
//!
//! Loads an ftrace or perf script trace and reports on it: load summary,
//! worst scheduling/wakeup latencies, per-task CPU time.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use tracelens::analyze::TaskStat;
use tracelens::time::parse_timestamp;
use tracelens::{LoadStatus, TraceAnalyzer, TraceTime};

#[derive(Parser)]
#[command(name = "tracelens")]
#[command(about = "Inspect kernel scheduling traces")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a trace and print a summary
    Report(ReportArgs),
    /// Show the worst scheduling or wakeup latencies
    Latency(LatencyArgs),
    /// Show per-task on-CPU time
    Tasks(TasksArgs),
}

#[derive(Args)]
struct ReportArgs {
    /// Path to the trace file
    #[arg(short, long)]
    file: PathBuf,

    /// Restrict the filtered-event count to these PIDs
    #[arg(short, long)]
    pid: Vec<i32>,

    /// Restrict the filtered-event count to these CPUs
    #[arg(short, long)]
    cpu: Vec<u32>,

    /// Restrict the filtered-event count to events whose arguments match
    #[arg(short, long)]
    regex: Vec<String>,

    /// Output format: table, csv, json
    #[arg(long, default_value = "table")]
    format: String,
}

#[derive(Args)]
struct LatencyArgs {
    /// Path to the trace file
    #[arg(short, long)]
    file: PathBuf,

    /// Latency list to query: sched or wakeup
    #[arg(short, long, default_value = "sched")]
    kind: String,

    /// How many samples to show
    #[arg(short, long, default_value = "20")]
    top: usize,

    /// Only this PID
    #[arg(short, long)]
    pid: Option<i32>,

    /// Output format: table, csv, json
    #[arg(long, default_value = "table")]
    format: String,
}

#[derive(Args)]
struct TasksArgs {
    /// Path to the trace file
    #[arg(short, long)]
    file: PathBuf,

    /// Window start, seconds (e.g. 123.456); defaults to trace start
    #[arg(short, long)]
    start: Option<String>,

    /// Window end, seconds; defaults to trace end
    #[arg(short, long)]
    end: Option<String>,

    /// How many tasks to show
    #[arg(short, long, default_value = "20")]
    top: usize,

    /// Output format: table, csv, json
    #[arg(long, default_value = "table")]
    format: String,
}

#[derive(Serialize)]
struct Report {
    file: String,
    dialect: String,
    lines: u64,
    events: usize,
    unparsed: u64,
    tasks: usize,
    cpus: u32,
    start_time: f64,
    end_time: f64,
    time_precision: u8,
    sched_latencies: usize,
    wakeup_latencies: usize,
    migrations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filtered_events: Option<usize>,
}

#[derive(Serialize)]
struct LatencyRow {
    pid: i32,
    task: String,
    cpu: u32,
    time: f64,
    delay_us: f64,
}

fn load(file: &PathBuf) -> Result<TraceAnalyzer> {
    let mut analyzer = TraceAnalyzer::new();
    match analyzer.open(file)? {
        LoadStatus::Complete => Ok(analyzer),
        LoadStatus::Cancelled => bail!("load was cancelled"),
    }
}

fn run_report(args: ReportArgs) -> Result<()> {
    let mut analyzer = load(&args.file)?;

    if !args.pid.is_empty() {
        analyzer.create_pid_filter(args.pid.iter().copied().collect::<HashSet<_>>(), false, true);
    }
    if !args.cpu.is_empty() {
        analyzer.create_cpu_filter(args.cpu.iter().copied().collect::<HashSet<_>>(), false);
    }
    if !args.regex.is_empty() {
        analyzer.create_regex_filter(&args.regex, false)?;
    }

    let report = Report {
        file: args.file.display().to_string(),
        dialect: format!("{:?}", analyzer.dialect().expect("loaded trace has a dialect")),
        lines: analyzer.summary().lines,
        events: analyzer.events.len(),
        unparsed: analyzer.summary().unparsed,
        tasks: analyzer.tasks().len(),
        cpus: analyzer.nr_cpus,
        start_time: analyzer.start_time.to_secs(),
        end_time: analyzer.end_time.to_secs(),
        time_precision: analyzer.time_precision(),
        sched_latencies: analyzer.sched_latencies.len(),
        wakeup_latencies: analyzer.wakeup_latencies.len(),
        migrations: analyzer.migrations.len(),
        filtered_events: analyzer.filtered_events().map(|f| f.len()),
    };

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "csv" | "table" => {
            let rows = vec![
                ("file", report.file.clone()),
                ("dialect", report.dialect.clone()),
                ("lines", report.lines.to_string()),
                ("events", report.events.to_string()),
                ("unparsed", report.unparsed.to_string()),
                ("tasks", report.tasks.to_string()),
                ("cpus", report.cpus.to_string()),
                ("start_time", format!("{:.6}", report.start_time)),
                ("end_time", format!("{:.6}", report.end_time)),
                ("time_precision", report.time_precision.to_string()),
                ("sched_latencies", report.sched_latencies.to_string()),
                ("wakeup_latencies", report.wakeup_latencies.to_string()),
                ("migrations", report.migrations.to_string()),
            ];
            let sep = if args.format == "csv" { "," } else { ": " };
            for (k, v) in rows {
                println!("{k}{sep}{v}");
            }
            if let Some(n) = report.filtered_events {
                println!("filtered_events{sep}{n}");
            }
        }
        other => bail!("unknown format: {other}"),
    }
    Ok(())
}

fn run_latency(args: LatencyArgs) -> Result<()> {
    let analyzer = load(&args.file)?;

    let list = match args.kind.as_str() {
        "sched" => &analyzer.sched_latencies,
        "wakeup" => &analyzer.wakeup_latencies,
        other => bail!("unknown latency kind: {other} (use sched or wakeup)"),
    };

    let mut samples: Vec<&tracelens::Latency> = list
        .iter()
        .filter(|l| args.pid.map_or(true, |pid| l.pid == pid))
        .collect();
    samples.sort_by(|a, b| b.delay.cmp(&a.delay));
    samples.truncate(args.top);

    let rows: Vec<LatencyRow> = samples
        .iter()
        .map(|l| LatencyRow {
            pid: l.pid,
            task: analyzer
                .task_by_pid(l.pid)
                .map(|t| t.display_name(analyzer.pool()))
                .unwrap_or_else(|| format!("<{}>", l.pid)),
            cpu: l.cpu,
            time: analyzer.events[l.sched_idx as usize].time.to_secs(),
            delay_us: l.delay_secs() * 1e6,
        })
        .collect();

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        "csv" => {
            println!("pid,task,cpu,time,delay_us");
            for r in rows {
                println!("{},{},{},{:.6},{:.1}", r.pid, r.task, r.cpu, r.time, r.delay_us);
            }
        }
        "table" => {
            println!("{:>8} {:<18} {:>4} {:>14} {:>12}", "PID", "TASK", "CPU", "TIME", "DELAY(us)");
            for r in rows {
                println!(
                    "{:>8} {:<18} {:>4} {:>14.6} {:>12.1}",
                    r.pid, r.task, r.cpu, r.time, r.delay_us
                );
            }
        }
        other => bail!("unknown format: {other}"),
    }
    Ok(())
}

fn run_tasks(args: TasksArgs) -> Result<()> {
    let analyzer = load(&args.file)?;

    let parse_bound = |s: &str| -> Result<TraceTime> {
        let with_colon = format!("{s}:");
        match parse_timestamp(with_colon.as_bytes()) {
            Some((t, _)) => Ok(t),
            None => bail!("bad time bound: {s}"),
        }
    };
    let lo = match &args.start {
        Some(s) => parse_bound(s)?,
        None => analyzer.start_time,
    };
    let hi = match &args.end {
        Some(s) => parse_bound(s)?,
        None => analyzer.end_time,
    };

    let mut stats: Vec<TaskStat> = analyzer.stats_time_limited(lo, hi);
    stats.truncate(args.top);

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
        "csv" => {
            println!("pid,task,on_cpu_s");
            for s in stats {
                println!("{},{},{:.6}", s.pid, s.name, s.on_cpu.to_secs());
            }
        }
        "table" => {
            println!("{:>8} {:<18} {:>12}", "PID", "TASK", "ON-CPU(s)");
            for s in stats {
                println!("{:>8} {:<18} {:>12.6}", s.pid, s.name, s.on_cpu.to_secs());
            }
        }
        other => bail!("unknown format: {other}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Report(args) => run_report(args),
        Commands::Latency(args) => run_latency(args),
        Commands::Tasks(args) => run_tasks(args),
    }
}
