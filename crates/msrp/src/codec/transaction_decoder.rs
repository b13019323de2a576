//! Incremental MSRP transaction decoder
//!
//! This module turns a raw byte stream into a sequence of [`Frame`]s, one transaction
//! after the other. It never blocks on incomplete input: whatever cannot be decided yet
//! stays in the source buffer until the next read.
//!
//! # State Machine
//!
//! - `StartLine`: waiting for `MSRP <tid> <method|status>` CRLF
//! - `Headers`: lexing header lines until a blank line (a body follows) or the
//!   end-line of the transaction (no body)
//! - `Body`: streaming body bytes until the end-line, holding back any suffix that
//!   could still turn into one
//! - `PendingEnd`: the end-line was found behind the last body frame
//!
//! Concatenated transactions need no special handling: after an end-line the decoder
//! is back in `StartLine` and keeps decoding from the same buffer.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use micro_msrp::codec::{Frame, TransactionDecoder};
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = TransactionDecoder::new();
//! let mut buf = BytesMut::from(&b"MSRP a786hjs2 200 OK\r\nTo-Path: msrp://a.example.com:7394/2s93i;tcp\r\n"[..]);
//! assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(Frame::Start(_))));
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::end_line::{find_end_line, parse_end_line};
use crate::codec::start_line::{MAX_START_LINE, StartLine, is_start_line_prefix};
use crate::protocol::{ContinuationFlag, ParseError, TransactionId};
use crate::utils::{ensure, find_subsequence};

const DEFAULT_MAX_HEADER_BYTES: usize = 16 * 1024;

/// One decoded piece of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Start(StartLine),
    /// All header lines, each terminated by CRLF. `content_stuff` tells whether a
    /// body section follows.
    Headers { block: Bytes, content_stuff: bool },
    Body(Bytes),
    End(ContinuationFlag),
}

#[derive(Debug)]
enum State {
    StartLine,
    Headers { tid: TransactionId, scanned: usize },
    Body { tid: TransactionId, at_body_start: bool },
    PendingEnd { flag: ContinuationFlag, len: usize },
}

#[derive(Debug)]
pub struct TransactionDecoder {
    state: State,
    max_header_bytes: usize,
}

impl TransactionDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_max_header_bytes(max_header_bytes: usize) -> Self {
        Self { state: State::StartLine, max_header_bytes }
    }

    /// Whether the decoder sits between two transactions.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::StartLine)
    }

    fn decode_start_line(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ParseError> {
        let Some(line_end) = find_subsequence(src, b"\r\n") else {
            ensure!(is_start_line_prefix(src), ParseError::invalid_start_line("stream does not start with a transaction"));
            ensure!(src.len() <= MAX_START_LINE, ParseError::invalid_start_line("start line too long"));
            return Ok(None);
        };
        ensure!(line_end <= MAX_START_LINE, ParseError::invalid_start_line("start line too long"));

        let start_line = StartLine::parse(&src[..line_end])?;
        src.advance(line_end + 2);

        trace!(tid = %start_line.tid, kind = ?start_line.kind, "decoded start line");
        self.state = State::Headers { tid: start_line.tid.clone(), scanned: 0 };
        Ok(Some(Frame::Start(start_line)))
    }

    fn decode_headers(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ParseError> {
        let State::Headers { tid, scanned } = &mut self.state else {
            return Ok(None);
        };

        loop {
            let Some(line_len) = find_subsequence(&src[*scanned..], b"\r\n") else {
                let current_size = src.len();
                ensure!(current_size <= self.max_header_bytes, ParseError::too_large_header(current_size, self.max_header_bytes));
                return Ok(None);
            };
            let line_start = *scanned;
            let line = &src[line_start..line_start + line_len];

            if line.is_empty() {
                let block = src.split_to(line_start).freeze();
                src.advance(2);
                self.state = State::Body { tid: tid.clone(), at_body_start: true };
                return Ok(Some(Frame::Headers { block, content_stuff: true }));
            }

            if let Some(flag) = parse_end_line(line, tid) {
                let block = src.split_to(line_start).freeze();
                self.state = State::PendingEnd { flag, len: line_len + 2 };
                return Ok(Some(Frame::Headers { block, content_stuff: false }));
            }

            *scanned = line_start + line_len + 2;
            ensure!(*scanned <= self.max_header_bytes, ParseError::too_large_header(*scanned, self.max_header_bytes));
        }
    }

    fn decode_body(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ParseError> {
        let State::Body { tid, at_body_start } = &mut self.state else {
            return Ok(None);
        };

        let scan = find_end_line(src, tid, *at_body_start);
        if scan.body_len > 0 {
            let body = src.split_to(scan.body_len).freeze();
            *at_body_start = false;
            if let Some((flag, len)) = scan.end {
                self.state = State::PendingEnd { flag, len };
            }
            return Ok(Some(Frame::Body(body)));
        }

        match scan.end {
            Some((flag, len)) => {
                src.advance(len);
                self.state = State::StartLine;
                Ok(Some(Frame::End(flag)))
            }
            None => Ok(None),
        }
    }
}

impl Default for TransactionDecoder {
    fn default() -> Self {
        Self::with_max_header_bytes(DEFAULT_MAX_HEADER_BYTES)
    }
}

impl Decoder for TransactionDecoder {
    type Item = Frame;
    type Error = ParseError;

    /// Decodes the next frame from `src`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(frame))`: a start line, the header block, a body slice or the end-line
    /// - `Ok(None)`: more data is needed
    /// - `Err(_)`: the stream can not be framed, the connection has to be closed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &self.state {
            State::StartLine => {
                if src.is_empty() {
                    return Ok(None);
                }
                self.decode_start_line(src)
            }
            State::Headers { .. } => self.decode_headers(src),
            State::Body { .. } => self.decode_body(src),
            State::PendingEnd { flag, len } => {
                let (flag, len) = (*flag, *len);
                if src.len() < len {
                    return Ok(None);
                }
                src.advance(len);
                self.state = State::StartLine;
                Ok(Some(Frame::End(flag)))
            }
        }
    }
}
