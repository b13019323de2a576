//! The per-transaction protocol state machine.
//!
//! A [`Transaction`] is one MSRP request or response, in either direction. The kind
//! is a tag ([`TransactionKind`]) rather than a type hierarchy; what differs between
//! directions lives in the private flow state:
//!
//! - **Outgoing** ([`outgoing`]): the head is rendered once at construction, then
//!   the connection pulls head bytes, body bytes, the CRLF separator and the end-line
//!   through independent cursors. Interrupting or aborting truncates the body and
//!   jumps to the end-line with `+` or `#`.
//! - **Incoming** ([`incoming`]): the connection feeds the recognized header, body
//!   slices and finally the end-line flag. Body bytes go straight into the message's
//!   data container in blocks of the report granularity.
//!
//! Responses and REPORTs ([`report`]) are plain transactions built by dedicated
//! constructors.

mod incoming;
mod outgoing;
mod report;

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::codec::{StartLine, StartLineKind, response_code_of};
use crate::manager::{ReportMechanism, Session};
use crate::protocol::{ContinuationFlag, Direction, MessageRef, Method, ResponseCode, TransactionHeader, TransactionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    Send,
    Report,
    Nickname,
    Unsupported(String),
    Response { code: u16, comment: Option<String> },
}

impl TransactionKind {
    /// Method of a request kind.
    pub fn method(&self) -> Option<Method> {
        match self {
            Self::Send => Some(Method::Send),
            Self::Report => Some(Method::Report),
            Self::Nickname => Some(Method::Nickname),
            Self::Unsupported(method) => Some(Method::Unsupported(method.clone())),
            Self::Response { .. } => None,
        }
    }
}

impl From<Method> for TransactionKind {
    fn from(method: Method) -> Self {
        match method {
            Method::Send => Self::Send,
            Method::Report => Self::Report,
            Method::Nickname => Self::Nickname,
            Method::Unsupported(method) => Self::Unsupported(method),
        }
    }
}

pub struct Transaction {
    tid: TransactionId,
    kind: TransactionKind,
    header: TransactionHeader,
    message: Option<MessageRef>,
    session: Option<Arc<Session>>,
    /// Flag of an incoming end-line, or the flag an outgoing one ends with when it
    /// is neither interrupted nor aborted.
    flag: ContinuationFlag,
    interruptible: bool,
    interrupted: bool,
    aborted: bool,
    complete: bool,
    valid: bool,
    response_code: Option<ResponseCode>,
    flow: Flow,
}

enum Flow {
    Outgoing(Producer),
    Incoming(Consumer),
}

/// Cursors of an outgoing transaction.
struct Producer {
    head: Bytes,
    head_read: usize,
    content_stuff: bool,
    body_offset: u64,
    body_len: u64,
    body_sent: u64,
    separator_read: usize,
    end_line: Option<Bytes>,
    end_line_read: usize,
}

/// Accumulation state of an incoming transaction.
struct Consumer {
    content_stuff: bool,
    header_complete: bool,
    received: u64,
    pending: BytesMut,
    scratch: BytesMut,
    report_mechanism: Arc<dyn ReportMechanism>,
}

impl Transaction {
    /// An incoming transaction announced by `start_line`.
    pub fn incoming(start_line: StartLine, report_mechanism: Arc<dyn ReportMechanism>) -> Self {
        let kind = match start_line.kind {
            StartLineKind::Request(method) => TransactionKind::from(method),
            StartLineKind::Response { code, comment } => TransactionKind::Response { code, comment },
        };
        Self::new(
            start_line.tid,
            kind,
            TransactionHeader::default(),
            Flow::Incoming(Consumer {
                content_stuff: false,
                header_complete: false,
                received: 0,
                pending: BytesMut::new(),
                scratch: BytesMut::new(),
                report_mechanism,
            }),
        )
    }

    fn new(tid: TransactionId, kind: TransactionKind, header: TransactionHeader, flow: Flow) -> Self {
        Self {
            tid,
            kind,
            header,
            message: None,
            session: None,
            flag: ContinuationFlag::End,
            interruptible: false,
            interrupted: false,
            aborted: false,
            complete: false,
            valid: true,
            response_code: None,
            flow,
        }
    }

    pub fn tid(&self) -> &TransactionId {
        &self.tid
    }

    pub fn kind(&self) -> &TransactionKind {
        &self.kind
    }

    pub fn direction(&self) -> Direction {
        match self.flow {
            Flow::Outgoing(_) => Direction::Outgoing,
            Flow::Incoming(_) => Direction::Incoming,
        }
    }

    pub fn header(&self) -> &TransactionHeader {
        &self.header
    }

    pub fn message(&self) -> Option<&MessageRef> {
        self.message.as_ref()
    }

    pub fn set_message(&mut self, message: MessageRef) {
        self.message = Some(message);
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub fn set_session(&mut self, session: Arc<Session>) {
        self.session = Some(session);
    }

    /// Whether `message` is the one carried by this transaction.
    pub fn carries(&self, message: &MessageRef) -> bool {
        self.message.as_ref().is_some_and(|m| Arc::ptr_eq(m, message))
    }

    pub fn is_interruptible(&self) -> bool {
        self.interruptible
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Code this transaction is answered with, set once a request was judged.
    pub fn response_code(&self) -> Option<ResponseCode> {
        self.response_code
    }

    /// Marks an incoming request as rejected, it is answered with `code`.
    pub fn invalidate(&mut self, code: ResponseCode) {
        self.valid = false;
        self.response_code = Some(code);
    }

    /// Code and comment of a response.
    pub fn status(&self) -> Option<(ResponseCode, Option<&str>)> {
        match &self.kind {
            TransactionKind::Response { code, comment } => Some((response_code_of(*code), comment.as_deref())),
            _ => None,
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("tid", &self.tid)
            .field("kind", &self.kind)
            .field("direction", &self.direction())
            .field("valid", &self.valid)
            .field("interrupted", &self.interrupted)
            .field("aborted", &self.aborted)
            .field("complete", &self.complete)
            .finish_non_exhaustive()
    }
}
