//! Extractors for the `prefix=value`, `name:value` and `[value]` argument
//! shapes that kernel trace events use.
//!
//! All of these return `Option` so the event parsers can bail out on the
//! first malformed argument without touching error state.

/// Kernel task names (`TASK_COMM_LEN`) are at most 16 bytes.
pub const TASKNAME_MAXLEN: usize = 16;

/// The rest of `tok` when it starts with `prefix`.
pub fn after_prefix<'a>(tok: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    tok.strip_prefix(prefix)
}

/// Bytes after the last occurrence of `ch`.
///
/// Task names can contain the separator themselves (`kworker/0:1-5`), so the
/// split is always on the last occurrence.
pub fn after_last(tok: &[u8], ch: u8) -> Option<&[u8]> {
    let pos = tok.iter().rposition(|&b| b == ch)?;
    Some(&tok[pos + 1..])
}

/// Bytes before the last occurrence of `ch`.
pub fn before_last(tok: &[u8], ch: u8) -> Option<&[u8]> {
    let pos = tok.iter().rposition(|&b| b == ch)?;
    Some(&tok[..pos])
}

pub fn parse_i32(bytes: &[u8]) -> Option<i32> {
    let (neg, digits) = match bytes.strip_prefix(b"-") {
        Some(rest) => (true, rest),
        None => (false, bytes),
    };
    if digits.is_empty() {
        return None;
    }
    let mut v: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v * 10 + (b - b'0') as i64;
        if v > u32::MAX as i64 {
            return None;
        }
    }
    if neg {
        v = -v;
    }
    i32::try_from(v).ok()
}

pub fn parse_u32(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() {
        return None;
    }
    let mut v: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v * 10 + (b - b'0') as u64;
        if v > u32::MAX as u64 {
            return None;
        }
    }
    Some(v as u32)
}

pub fn parse_u64(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut v: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    Some(v)
}

/// Integer after the last `ch` in `tok`, as in `bash:42` or `pid=42`.
pub fn int_after(tok: &[u8], ch: u8) -> Option<i32> {
    parse_i32(after_last(tok, ch)?)
}

/// Integer value of a `prefix=N` style token. The prefix must match.
pub fn int_after_prefix(tok: &[u8], prefix: &[u8]) -> Option<i32> {
    parse_i32(after_prefix(tok, prefix)?)
}

pub fn uint_after_prefix(tok: &[u8], prefix: &[u8]) -> Option<u32> {
    parse_u32(after_prefix(tok, prefix)?)
}

/// The value inside a leading `[value]` group, e.g. `[120]` or `[003]`.
/// Trailing bytes after the closing bracket are ignored.
pub fn inside_brackets(tok: &[u8]) -> Option<&[u8]> {
    let rest = tok.strip_prefix(b"[")?;
    let close = rest.iter().position(|&b| b == b']')?;
    Some(&rest[..close])
}

/// True for a plain bracketed unsigned integer like `[120]`.
pub fn is_bracketed_uint(tok: &[u8]) -> bool {
    match inside_brackets(tok) {
        Some(inner) => {
            tok.len() == inner.len() + 2 && !inner.is_empty() && parse_u32(inner).is_some()
        }
        None => false,
    }
}

/// True for a bracketed integer that may be glued to a `<CANT FIND FIELD ...>`
/// marker, which an old libtraceevent emits for the success field. The marker
/// contains spaces, so only its first fragment is part of this token.
pub fn is_bracketed_uint_or_cant(tok: &[u8]) -> bool {
    match inside_brackets(tok) {
        Some(inner) => {
            if inner.is_empty() || parse_u32(inner).is_none() {
                return false;
            }
            let rest = &tok[inner.len() + 2..];
            rest.is_empty() || rest.starts_with(b"<CANT")
        }
        None => false,
    }
}

/// Scratch buffer for reassembling task names that the tokenizer split on
/// whitespace. Bounded by [`TASKNAME_MAXLEN`]; any overflow fails the line.
#[derive(Debug, Default)]
pub struct NameBuf {
    buf: [u8; TASKNAME_MAXLEN],
    len: usize,
}

impl NameBuf {
    pub fn new() -> Self {
        NameBuf::default()
    }

    #[must_use]
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if self.len + bytes.len() > TASKNAME_MAXLEN {
            return false;
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        true
    }

    /// Append the space that the tokenizer swallowed between two fragments.
    #[must_use]
    pub fn push_space(&mut self) -> bool {
        self.push(b" ")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Merge whole argv tokens `argv[begin..end]` into `buf`, space separated.
/// An empty range appends nothing.
#[must_use]
pub fn merge_tokens(argv: &[&[u8]], begin: usize, end: usize, buf: &mut NameBuf) -> bool {
    if begin >= end {
        return true;
    }
    if end > argv.len() {
        return false;
    }
    for (n, tok) in argv[begin..end].iter().enumerate() {
        if (n > 0 || !buf.is_empty()) && !buf.push_space() {
            return false;
        }
        if !buf.push(tok) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_prefix() {
        assert_eq!(after_prefix(b"pid=42", b"pid="), Some(&b"42"[..]));
        assert_eq!(after_prefix(b"prio=120", b"pid="), None);
    }

    #[test]
    fn test_after_last_uses_last_separator() {
        // kworker names contain the separator themselves.
        assert_eq!(after_last(b"kworker/0:1:5", b':'), Some(&b"5"[..]));
        assert_eq!(before_last(b"kworker/0:1:5", b':'), Some(&b"kworker/0:1"[..]));
    }

    #[test]
    fn test_int_after() {
        assert_eq!(int_after(b"bash:42", b':'), Some(42));
        assert_eq!(int_after(b"prev_pid=5", b'='), Some(5));
        assert_eq!(int_after(b"bash", b':'), None);
        assert_eq!(int_after(b"bash:", b':'), None);
        assert_eq!(int_after(b"bash:x", b':'), None);
    }

    #[test]
    fn test_parse_i32_bounds() {
        assert_eq!(parse_i32(b"-1"), Some(-1));
        assert_eq!(parse_i32(b"2147483647"), Some(i32::MAX));
        assert_eq!(parse_i32(b"2147483648"), None);
        assert_eq!(parse_i32(b""), None);
        assert_eq!(parse_i32(b"-"), None);
    }

    #[test]
    fn test_inside_brackets() {
        assert_eq!(inside_brackets(b"[120]"), Some(&b"120"[..]));
        assert_eq!(inside_brackets(b"[003]"), Some(&b"003"[..]));
        assert_eq!(inside_brackets(b"120]"), None);
        assert_eq!(inside_brackets(b"[120"), None);
    }

    #[test]
    fn test_is_bracketed_uint() {
        assert!(is_bracketed_uint(b"[120]"));
        assert!(!is_bracketed_uint(b"[120]x"));
        assert!(!is_bracketed_uint(b"[-2]"));
        assert!(!is_bracketed_uint(b"[]"));
        assert!(!is_bracketed_uint(b"success=1"));
    }

    #[test]
    fn test_is_bracketed_uint_or_cant() {
        assert!(is_bracketed_uint_or_cant(b"[120]"));
        assert!(is_bracketed_uint_or_cant(b"[120]<CANT"));
        assert!(!is_bracketed_uint_or_cant(b"[120]x"));
        assert!(!is_bracketed_uint_or_cant(b"[-2]<CANT"));
    }

    #[test]
    fn test_namebuf_overflow() {
        let mut buf = NameBuf::new();
        assert!(buf.push(b"0123456789abcdef")); // exactly 16
        assert!(!buf.push(b"x"));
        assert_eq!(buf.as_bytes(), b"0123456789abcdef");
    }

    #[test]
    fn test_merge_tokens() {
        let argv: Vec<&[u8]> = vec![b"Web", b"Content", b"tail"];
        let mut buf = NameBuf::new();
        assert!(merge_tokens(&argv, 0, 2, &mut buf));
        assert_eq!(buf.as_bytes(), b"Web Content");
    }

    #[test]
    fn test_merge_tokens_empty_range() {
        let argv: Vec<&[u8]> = vec![b"only"];
        let mut buf = NameBuf::new();
        assert!(merge_tokens(&argv, 1, 1, &mut buf));
        assert!(merge_tokens(&argv, 1, 0, &mut buf));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_merge_tokens_overflow_fails() {
        let argv: Vec<&[u8]> = vec![b"very-long-name", b"continuation"];
        let mut buf = NameBuf::new();
        assert!(!merge_tokens(&argv, 0, 2, &mut buf));
    }
}
