//! End-line recognition on both sides of the connection.
//!
//! An end-line is `-------` + transaction id + flag + CRLF. With content-stuff it is
//! preceded by a bare CRLF that separates it from the body. Because the body may be
//! binary, the same byte sequence can appear inside it:
//!
//! - the sender runs an [`EndLineScanner`] over every body byte it emits and splits
//!   the transaction before a colliding sequence reaches the wire;
//! - the receiver uses [`find_end_line`] to locate the first real end-line and to
//!   hold back a trailing partial match until more bytes arrive.
//!
//! Both treat the start of a body as if a CRLF had just been seen, since the blank
//! line closing the header section is one.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{ContinuationFlag, TransactionId};

pub(crate) const END_LINE_DASHES: &[u8] = b"-------";

/// Bytes of an end-line excluding the transaction id.
pub(crate) const END_LINE_OVERHEAD: usize = END_LINE_DASHES.len() + 1 + 2;

/// `-------<tid><flag>\r\n`
pub fn end_line(tid: &TransactionId, flag: ContinuationFlag) -> Bytes {
    let mut buf = BytesMut::with_capacity(tid.len() + END_LINE_OVERHEAD);
    buf.put_slice(END_LINE_DASHES);
    buf.put_slice(tid.as_bytes());
    buf.put_u8(flag.as_byte());
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Checks whether a header line (without CRLF) is the end-line of `tid`.
pub(crate) fn parse_end_line(line: &[u8], tid: &TransactionId) -> Option<ContinuationFlag> {
    let rest = line.strip_prefix(END_LINE_DASHES)?.strip_prefix(tid.as_bytes())?;
    match rest {
        [flag] => ContinuationFlag::from_byte(*flag),
        _ => None,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum EndLineMatch {
    Complete(ContinuationFlag, usize),
    /// The input ended while still matching.
    Partial,
    Mismatch,
}

/// Matches `-------<tid><flag>\r\n` at the start of `candidate`.
pub(crate) fn match_end_line(candidate: &[u8], tid: &[u8]) -> EndLineMatch {
    let flag_at = END_LINE_DASHES.len() + tid.len();
    let total = flag_at + 3;
    let mut flag = None;

    for i in 0..total {
        let Some(&b) = candidate.get(i) else {
            return EndLineMatch::Partial;
        };
        let ok = if i < END_LINE_DASHES.len() {
            b == b'-'
        } else if i < flag_at {
            b == tid[i - END_LINE_DASHES.len()]
        } else if i == flag_at {
            flag = ContinuationFlag::from_byte(b);
            flag.is_some()
        } else if i == flag_at + 1 {
            b == b'\r'
        } else {
            b == b'\n'
        };
        if !ok {
            return EndLineMatch::Mismatch;
        }
    }

    match flag {
        Some(flag) => EndLineMatch::Complete(flag, total),
        None => EndLineMatch::Mismatch,
    }
}

/// Result of searching a body buffer for the end-line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct BodyScan {
    /// Bytes at the front of the buffer that are body for sure.
    pub body_len: usize,
    /// Flag and length of the separator plus end-line, when it starts right after `body_len`.
    pub end: Option<(ContinuationFlag, usize)>,
}

/// Locates the first end-line of `tid` in `buf`.
///
/// `at_body_start` allows an end-line without the CRLF separator at offset 0.
pub(crate) fn find_end_line(buf: &[u8], tid: &TransactionId, at_body_start: bool) -> BodyScan {
    let tid = tid.as_bytes();

    if at_body_start {
        match match_end_line(buf, tid) {
            EndLineMatch::Complete(flag, len) => return BodyScan { body_len: 0, end: Some((flag, len)) },
            EndLineMatch::Partial => return BodyScan { body_len: 0, end: None },
            EndLineMatch::Mismatch => {}
        }
    }

    let mut from = 0;
    while let Some(pos) = buf[from..].iter().position(|b| *b == b'\r') {
        let i = from + pos;
        let rest = &buf[i..];
        match rest.get(1) {
            None => return BodyScan { body_len: i, end: None },
            Some(b'\n') => match match_end_line(&rest[2..], tid) {
                EndLineMatch::Complete(flag, len) => return BodyScan { body_len: i, end: Some((flag, len + 2)) },
                EndLineMatch::Partial => return BodyScan { body_len: i, end: None },
                EndLineMatch::Mismatch => {}
            },
            Some(_) => {}
        }
        from = i + 1;
    }

    BodyScan { body_len: buf.len(), end: None }
}

/// Streaming detector for `\r\n-------<tid>` followed by a continuation flag in
/// outgoing body bytes.
///
/// Besides detecting a collision it tells how many of the bytes fed so far belong
/// to an unfinished match, so a sender can hold them back at a buffer boundary.
#[derive(Debug, Clone)]
pub struct EndLineScanner {
    pattern: Vec<u8>,
    matched: usize,
    /// leading pattern bytes matched by the virtual CRLF at body start
    assumed: usize,
}

impl EndLineScanner {
    pub fn new(tid: &TransactionId) -> Self {
        let mut pattern = Vec::with_capacity(2 + END_LINE_DASHES.len() + tid.len());
        pattern.extend_from_slice(b"\r\n");
        pattern.extend_from_slice(END_LINE_DASHES);
        pattern.extend_from_slice(tid.as_bytes());
        Self { pattern, matched: 0, assumed: 0 }
    }

    /// Restarts matching; at the start of a body the preceding CRLF counts as matched.
    pub fn reset(&mut self, at_body_start: bool) {
        self.assumed = if at_body_start { 2 } else { 0 };
        self.matched = self.assumed;
    }

    /// Pattern bytes matched so far, including a virtual leading CRLF.
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Fed bytes taking part in the current partial match.
    pub fn pending(&self) -> usize {
        self.matched - self.assumed
    }

    /// Forgets the pending bytes after the caller took them back.
    pub fn rewind(&mut self) {
        self.matched = self.assumed;
    }

    /// Length of a full collision, flag included.
    pub fn collision_len(&self) -> usize {
        self.pattern.len() + 1
    }

    /// Feeds one body byte.
    ///
    /// When the byte completes a collision, returns how many fed bytes (this one
    /// included) make up the colliding sequence.
    pub fn feed(&mut self, b: u8) -> Option<usize> {
        if self.matched == self.pattern.len() {
            if ContinuationFlag::from_byte(b).is_some() {
                let fed = self.collision_len() - self.assumed;
                self.matched = 0;
                self.assumed = 0;
                return Some(fed);
            }
        } else if b == self.pattern[self.matched] {
            self.matched += 1;
            return None;
        }

        // '\r' only occurs at the start of the pattern
        self.assumed = 0;
        self.matched = usize::from(b == b'\r');
        None
    }
}
