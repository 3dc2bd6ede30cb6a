//! Line tokenizer for the two supported trace dialects.
//!
//! The tracer dialect (ftrace text output) prints
//! `TASK-PID [CPU] FLAGS TIMESTAMP: EVENT: ARGS...`; the sampling-profiler
//! dialect (perf script output) prints `TASK PID [CPU] TIMESTAMP: EVENT: ...`
//! with an optional `TASK-PID` variant and optional tab-indented backtrace
//! lines after each event. Both are whitespace-tokenized here; the event
//! parsers work on the argv slice.

use crate::event::NR_CPUS_ALLOWED;
use crate::params::{inside_brackets, is_bracketed_uint, parse_i32, parse_u32};
use crate::time::{parse_timestamp, TraceTime};

/// Trace file dialect, decided once per file before ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// ftrace tracer output.
    Ftrace,
    /// perf script output, with optional backtrace continuation lines.
    Perf,
}

/// Why a line failed to tokenize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFail {
    /// Did not match the event-line grammar.
    Malformed,
    /// Matched the grammar but named a CPU outside 0..=255.
    CpuRange,
}

/// A tokenized event line, borrowing the raw line buffer.
#[derive(Debug)]
pub struct RawLine<'a> {
    pub comm: Vec<u8>,
    pub pid: i32,
    pub cpu: u32,
    pub time: TraceTime,
    pub precision: u8,
    pub event_name: &'a [u8],
    pub argv: Vec<&'a [u8]>,
    /// True when the header carried the PID as its own token (perf style)
    /// rather than glued to the task name with a dash (ftrace style).
    pub separate_pid: bool,
}

fn split_tokens(line: &[u8]) -> Vec<&[u8]> {
    line.split(|&b| b == b' ' || b == b'\t')
        .filter(|t| !t.is_empty())
        .collect()
}

/// True for a perf backtrace continuation line. perf script indents frames
/// with a tab, which never starts an event line (those lead with the
/// space-padded task name).
pub fn is_continuation(line: &[u8]) -> bool {
    line.first() == Some(&b'\t')
}

pub fn is_comment(line: &[u8]) -> bool {
    let trimmed: &[u8] = match line.iter().position(|&b| b != b' ' && b != b'\t') {
        Some(i) => &line[i..],
        None => b"",
    };
    trimmed.is_empty() || trimmed[0] == b'#'
}

/// Tokenize one event line.
///
/// The timestamp is located first (the token that parses as a decimal number
/// with a `:` terminator, followed by the event-name token which also ends in
/// `:`); the CPU is the last bracketed integer before it; what remains in
/// front is the task name and PID.
pub fn tokenize(line: &[u8]) -> Result<RawLine<'_>, LineFail> {
    let tokens = split_tokens(line);

    let mut found = None;
    for (i, tok) in tokens.iter().enumerate() {
        if let Some((time, precision)) = parse_timestamp(tok) {
            if let Some(next) = tokens.get(i + 1) {
                if next.ends_with(b":") {
                    found = Some((i, time, precision));
                    break;
                }
            }
        }
    }
    let (ts_idx, time, precision) = found.ok_or(LineFail::Malformed)?;

    let name_tok = &tokens[ts_idx + 1][..tokens[ts_idx + 1].len() - 1];
    // perf prints the subsystem too (`sched:sched_switch`); only the event
    // name itself matters.
    let event_name = match name_tok.iter().rposition(|&b| b == b':') {
        Some(p) => &name_tok[p + 1..],
        None => name_tok,
    };
    if event_name.is_empty() {
        return Err(LineFail::Malformed);
    }

    let cpu_idx = tokens[..ts_idx]
        .iter()
        .rposition(|t| is_bracketed_uint(t))
        .ok_or(LineFail::Malformed)?;
    let cpu = inside_brackets(tokens[cpu_idx])
        .and_then(parse_u32)
        .ok_or(LineFail::Malformed)?;
    if cpu >= NR_CPUS_ALLOWED {
        return Err(LineFail::CpuRange);
    }

    let header = &tokens[..cpu_idx];
    if header.is_empty() {
        return Err(LineFail::Malformed);
    }

    let last = header[header.len() - 1];
    let (comm_tokens, comm_tail, pid, separate_pid) = if header.len() >= 2
        && parse_u32(last).is_some()
    {
        // perf style: the PID is its own token.
        let pid = parse_i32(last).ok_or(LineFail::Malformed)?;
        (&header[..header.len() - 1], None, pid, true)
    } else {
        // TASK-PID: split the last token on its last dash. Task names can
        // contain dashes themselves.
        let dash = last
            .iter()
            .rposition(|&b| b == b'-')
            .ok_or(LineFail::Malformed)?;
        let pid = parse_i32(&last[dash + 1..]).ok_or(LineFail::Malformed)?;
        (&header[..header.len() - 1], Some(&last[..dash]), pid, false)
    };

    // Task names can contain spaces; the fragments are rejoined here. The
    // header is not bounded like event arguments are, so no overflow check.
    let mut comm = Vec::new();
    for tok in comm_tokens {
        if !comm.is_empty() {
            comm.push(b' ');
        }
        comm.extend_from_slice(tok);
    }
    if let Some(tail) = comm_tail {
        if !comm.is_empty() {
            comm.push(b' ');
        }
        comm.extend_from_slice(tail);
    }

    let argv = tokens[ts_idx + 2..].to_vec();

    Ok(RawLine {
        comm,
        pid,
        cpu,
        time,
        precision,
        event_name,
        argv,
        separate_pid,
    })
}

/// Scan the first lines of a file and decide the dialect.
///
/// Each line that tokenizes casts a vote based on how it carries the PID;
/// tab-indented lines vote for perf (only perf emits backtraces). `None`
/// means neither dialect matched, which aborts ingestion.
pub fn detect_dialect<'a, I>(lines: I) -> Option<Dialect>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut ftrace = 0usize;
    let mut perf = 0usize;
    let mut scanned = 0usize;
    for line in lines {
        if is_comment(line) {
            continue;
        }
        if scanned >= 100 {
            break;
        }
        scanned += 1;
        if is_continuation(line) {
            perf += 1;
            continue;
        }
        match tokenize(line) {
            Ok(raw) if raw.separate_pid => perf += 1,
            Ok(_) => ftrace += 1,
            Err(_) => {}
        }
    }
    if ftrace == 0 && perf == 0 {
        None
    } else if perf > ftrace {
        Some(Dialect::Perf)
    } else {
        Some(Dialect::Ftrace)
    }
}
