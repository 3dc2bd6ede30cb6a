//! Parsers for the scheduler event families.
//!
//! `sched_switch` comes in two historical shapes:
//!
//! ```text
//! prev_comm=X prev_pid=N prev_prio=N prev_state=S ==> next_comm=Y next_pid=N next_prio=N
//! X:N [N] S ==> Y:N [N]
//! ```
//!
//! and the wakeup family in three:
//!
//! ```text
//! X:N [PRIO] CPU:N                               (libtraceevent)
//! X:N [PRIO]<CANT FIND FIELD success> CPU:N      (newer perf, old libtraceevent)
//! comm=X pid=N prio=N [success=1] target_cpu=N   (classic)
//! ```
//!
//! Task names may contain spaces, so every name is reassembled from the
//! argv fragments around its flanking tokens, bounded by the kernel comm
//! length.

use super::ParseFail;
use crate::event::{
    EventPayload, SchedExitFields, SchedForkFields, SchedMigrateFields, SchedSwitchFields,
    SchedWakeFields, TaskState,
};
use crate::params::{
    after_prefix, before_last, inside_brackets, int_after, int_after_prefix, is_bracketed_uint,
    is_bracketed_uint_or_cant, merge_tokens, parse_u32, uint_after_prefix, NameBuf,
};
use crate::pool::{StrRef, StringPool};

/// Reassemble a name whose first fragment sits behind `prefix=` in
/// `argv[first]`, with continuation fragments in `argv[first+1..stop]`.
fn name_after_prefix(
    pool: &mut StringPool,
    argv: &[&[u8]],
    first: usize,
    prefix: &[u8],
    stop: usize,
) -> Result<StrRef, ParseFail> {
    let head = after_prefix(argv[first], prefix).ok_or(ParseFail::BadArgs)?;
    let mut buf = NameBuf::new();
    if !buf.push(head) {
        return Err(ParseFail::NameOverflow);
    }
    if !merge_tokens(argv, first + 1, stop, &mut buf) {
        return Err(ParseFail::NameOverflow);
    }
    Ok(pool.intern(buf.as_bytes()))
}

/// Reassemble a name from whole tokens `argv[begin..colon_tok]` plus the part
/// of `argv[colon_tok]` before its last `:` (the `NAME:PID` shape).
fn name_before_colon(
    pool: &mut StringPool,
    argv: &[&[u8]],
    begin: usize,
    colon_tok: usize,
) -> Result<StrRef, ParseFail> {
    let mut buf = NameBuf::new();
    if !merge_tokens(argv, begin, colon_tok, &mut buf) {
        return Err(ParseFail::NameOverflow);
    }
    let tail = before_last(argv[colon_tok], b':').ok_or(ParseFail::BadArgs)?;
    if !buf.is_empty() && !buf.push_space() {
        return Err(ParseFail::NameOverflow);
    }
    if !buf.push(tail) {
        return Err(ParseFail::NameOverflow);
    }
    Ok(pool.intern(buf.as_bytes()))
}

pub fn sched_switch(pool: &mut StringPool, argv: &[&[u8]]) -> Result<EventPayload, ParseFail> {
    let argc = argv.len();
    let arrow = argv
        .iter()
        .position(|t| *t == b"==>")
        .ok_or(ParseFail::BadArgs)?;
    let regular = argv[..arrow].iter().any(|t| t.starts_with(b"prev_pid="));

    let fields = if regular {
        if arrow < 4 || argc < arrow + 4 {
            return Err(ParseFail::BadArgs);
        }

        // The pid tokens are at fixed offsets from the arrow unless a name
        // contained something that shifted them; fall back to a scan.
        let ppid_idx = if argv[arrow - 3].starts_with(b"prev_pid=") {
            arrow - 3
        } else {
            argv[..arrow]
                .iter()
                .rposition(|t| t.starts_with(b"prev_pid="))
                .ok_or(ParseFail::BadArgs)?
        };
        let prev_pid = int_after_prefix(argv[ppid_idx], b"prev_pid=").ok_or(ParseFail::BadArgs)?;
        let prev_prio = argv[ppid_idx + 1..arrow]
            .iter()
            .find_map(|t| uint_after_prefix(t, b"prev_prio="));
        let prev_state = argv[..arrow]
            .iter()
            .rev()
            .find_map(|t| after_prefix(t, b"prev_state="))
            .and_then(TaskState::parse);
        let prev_name = name_after_prefix(pool, argv, 0, b"prev_comm=", ppid_idx)?;

        let npid_idx = if argv[argc - 2].starts_with(b"next_pid=") {
            argc - 2
        } else {
            arrow
                + 1
                + argv[arrow + 1..]
                    .iter()
                    .rposition(|t| t.starts_with(b"next_pid="))
                    .ok_or(ParseFail::BadArgs)?
        };
        let next_pid = int_after_prefix(argv[npid_idx], b"next_pid=").ok_or(ParseFail::BadArgs)?;
        let next_prio = argv[npid_idx + 1..]
            .iter()
            .find_map(|t| uint_after_prefix(t, b"next_prio="));
        let next_name = name_after_prefix(pool, argv, arrow + 1, b"next_comm=", npid_idx)?;

        SchedSwitchFields {
            prev_pid,
            prev_prio,
            prev_state,
            prev_name,
            next_pid,
            next_prio,
            next_name,
        }
    } else {
        // Distribution style: NAME:PID [PRIO] STATE ==> NAME:PID [PRIO]
        if arrow < 3 || argc < arrow + 3 {
            return Err(ParseFail::BadArgs);
        }
        let prev_pid = int_after(argv[arrow - 3], b':').ok_or(ParseFail::BadArgs)?;
        let prev_prio = inside_brackets(argv[arrow - 2]).and_then(parse_u32);
        let state_tok = argv[arrow - 1];
        let prev_state = if state_tok.len() <= 2 {
            TaskState::parse(state_tok)
        } else {
            None
        };
        let prev_name = name_before_colon(pool, argv, 0, arrow - 3)?;

        let next_pid = int_after(argv[argc - 2], b':').ok_or(ParseFail::BadArgs)?;
        let next_prio = inside_brackets(argv[argc - 1]).and_then(parse_u32);
        let next_name = name_before_colon(pool, argv, arrow + 1, argc - 2)?;

        SchedSwitchFields {
            prev_pid,
            prev_prio,
            prev_state,
            prev_name,
            next_pid,
            next_prio,
            next_name,
        }
    };

    Ok(EventPayload::SchedSwitch(fields))
}

/// Shared by `sched_wakeup`, `sched_wakeup_new` and `sched_waking`; the
/// families print identical argument shapes across all supported kernels.
pub fn sched_wake(pool: &mut StringPool, argv: &[&[u8]]) -> Result<SchedWakeFields, ParseFail> {
    let argc = argv.len();
    if argc < 3 {
        return Err(ParseFail::BadArgs);
    }
    let last = argv[argc - 1];

    if let Some(cpu_str) = after_prefix(last, b"CPU:") {
        // libtraceevent output. Walk back from the tail until the bracketed
        // priority (or the CANT marker an old libtraceevent leaves behind);
        // the token in front of it is NAME:PID.
        let target_cpu = parse_u32(cpu_str).ok_or(ParseFail::BadArgs)?;
        let prio_idx = argv[1..argc - 1]
            .iter()
            .rposition(|t| is_bracketed_uint_or_cant(t))
            .map(|p| p + 1);
        let pid_idx = prio_idx.map_or(0, |p| p - 1);
        let pid = int_after(argv[pid_idx], b':').ok_or(ParseFail::BadArgs)?;
        // Only a clean `[N]` is trusted for the priority; the glued CANT
        // marker shape is left unresolved rather than guessed at.
        let prio = prio_idx
            .filter(|&p| is_bracketed_uint(argv[p]))
            .and_then(|p| inside_brackets(argv[p]))
            .and_then(parse_u32);
        let name = name_before_colon(pool, argv, 0, pid_idx)?;
        Ok(SchedWakeFields {
            pid,
            prio,
            target_cpu,
            name,
        })
    } else if let Some(cpu_str) = after_prefix(last, b"target_cpu=") {
        // Classic format.
        let target_cpu = parse_u32(cpu_str).ok_or(ParseFail::BadArgs)?;
        let pid_idx = argv[..argc - 1]
            .iter()
            .rposition(|t| t.starts_with(b"pid="))
            .ok_or(ParseFail::BadArgs)?;
        let pid = int_after_prefix(argv[pid_idx], b"pid=").ok_or(ParseFail::BadArgs)?;
        let prio = argv[pid_idx + 1..argc - 1]
            .iter()
            .find_map(|t| uint_after_prefix(t, b"prio="));
        let name = name_after_prefix(pool, argv, 0, b"comm=", pid_idx)?;
        Ok(SchedWakeFields {
            pid,
            prio,
            target_cpu,
            name,
        })
    } else {
        Err(ParseFail::BadArgs)
    }
}

pub fn sched_migrate(argv: &[&[u8]]) -> Result<EventPayload, ParseFail> {
    let argc = argv.len();
    // comm= is not needed, so four arguments are enough.
    if argc < 4 {
        return Err(ParseFail::BadArgs);
    }
    let pid = int_after_prefix(argv[argc - 4], b"pid=").ok_or(ParseFail::BadArgs)?;
    let prio = uint_after_prefix(argv[argc - 3], b"prio=").ok_or(ParseFail::BadArgs)?;
    let orig_cpu = uint_after_prefix(argv[argc - 2], b"orig_cpu=").ok_or(ParseFail::BadArgs)?;
    let dest_cpu = uint_after_prefix(argv[argc - 1], b"dest_cpu=").ok_or(ParseFail::BadArgs)?;
    Ok(EventPayload::SchedMigrateTask(SchedMigrateFields {
        pid,
        prio,
        orig_cpu,
        dest_cpu,
    }))
}

pub fn sched_fork(pool: &mut StringPool, argv: &[&[u8]]) -> Result<EventPayload, ParseFail> {
    let argc = argv.len();
    if argc < 4 {
        return Err(ParseFail::BadArgs);
    }

    // child_pid is normally last; tolerate trailing junk by scanning back.
    let cp_idx = if argv[argc - 1].starts_with(b"child_pid=") {
        argc - 1
    } else {
        argv[1..argc - 1]
            .iter()
            .rposition(|t| t.starts_with(b"child_pid="))
            .map(|p| p + 1)
            .ok_or(ParseFail::BadArgs)?
    };
    let child_pid = int_after_prefix(argv[cp_idx], b"child_pid=").ok_or(ParseFail::BadArgs)?;

    // The parent pid is identified by the pid=/child_comm= adjacency; a
    // parent name containing "pid=" would fool a bare prefix scan.
    let mut anchor = None;
    for i in 1..cp_idx {
        if argv[i].starts_with(b"pid=") && argv[i + 1].starts_with(b"child_comm=") {
            anchor = Some(i);
            break;
        }
    }
    let anchor = anchor.ok_or(ParseFail::BadArgs)?;
    let parent_pid = int_after_prefix(argv[anchor], b"pid=").ok_or(ParseFail::BadArgs)?;
    let child_name = name_after_prefix(pool, argv, anchor + 1, b"child_comm=", cp_idx)?;

    Ok(EventPayload::SchedProcessFork(SchedForkFields {
        parent_pid,
        child_pid,
        child_name,
    }))
}

pub fn sched_exit(argv: &[&[u8]]) -> Result<EventPayload, ParseFail> {
    let argc = argv.len();
    // The prio argument may be missing.
    if argc < 2 {
        return Err(ParseFail::BadArgs);
    }
    let pid = int_after_prefix(argv[argc - 2], b"pid=").ok_or(ParseFail::BadArgs)?;
    Ok(EventPayload::SchedProcessExit(SchedExitFields { pid }))
}
