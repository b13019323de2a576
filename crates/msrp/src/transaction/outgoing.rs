use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

use crate::codec::{Head, HeaderEncoder, end_line, response_code_of};
use crate::manager::Session;
use crate::protocol::{ByteRange, ContinuationFlag, MessageRef, Method, MsrpError, TransactionHeader, TransactionId};
use crate::transaction::{Flow, Producer, Transaction, TransactionKind};
use crate::utils::ensure;

const SEPARATOR: &[u8; 2] = b"\r\n";

impl Transaction {
    /// One SEND chunk carrying `len` bytes of `message` starting at `offset`.
    ///
    /// The last chunk of a message ends with `$`, every other one with `+`.
    pub fn send_chunk(tid: TransactionId, session: Arc<Session>, message: MessageRef, offset: u64, len: u64, last: bool) -> Result<Self, MsrpError> {
        let mut header = TransactionHeader::new(session.to_path().to_vec(), vec![session.uri().clone()]);
        {
            let message = message.lock();
            header.message_id = Some(message.message_id().clone());
            header.byte_range = Some(ByteRange::new(offset + 1, Some(offset + len), message.size().known()));
            header.content_type = message.content_type().cloned();
            header.failure_report = message.failure_report();
            header.success_report = message.success_report();
        }

        let mut transaction = Self::outgoing(tid, TransactionKind::Send, header, len > 0, offset, len)?;
        transaction.flag = if last { ContinuationFlag::End } else { ContinuationFlag::Interrupt };
        transaction.interruptible = true;
        transaction.message = Some(message);
        transaction.session = Some(session);
        Ok(transaction)
    }

    /// A NICKNAME request asking the peer to use `nickname` for this session.
    ///
    /// The nickname is written as a quoted string, so it may not hold quotes,
    /// backslashes or control characters.
    pub fn nickname(tid: TransactionId, session: Arc<Session>, nickname: &str) -> Result<Self, MsrpError> {
        ensure!(
            !nickname.is_empty() && !nickname.chars().any(|c| c == '"' || c == '\\' || c.is_control()),
            MsrpError::illegal_use(format!("nickname {nickname:?} can't be sent in Use-Nickname"))
        );
        let mut header = TransactionHeader::new(session.to_path().to_vec(), vec![session.uri().clone()]);
        header.nickname = Some(nickname.to_string());

        let mut transaction = Self::outgoing(tid, TransactionKind::Nickname, header, false, 0, 0)?;
        transaction.session = Some(session);
        Ok(transaction)
    }

    pub(crate) fn outgoing(
        tid: TransactionId,
        kind: TransactionKind,
        header: TransactionHeader,
        content_stuff: bool,
        body_offset: u64,
        body_len: u64,
    ) -> Result<Self, MsrpError> {
        let mut head = BytesMut::new();
        match &kind {
            TransactionKind::Response { code, comment } => {
                let code = response_code_of(*code);
                HeaderEncoder.encode(
                    Head::Response { tid: &tid, code, comment: comment.as_deref(), to_path: &header.to_path, from_path: &header.from_path },
                    &mut head,
                )?;
            }
            kind => {
                let method = kind.method().unwrap_or(Method::Send);
                HeaderEncoder.encode(Head::Request { tid: &tid, method: &method, header: &header, content_stuff }, &mut head)?;
            }
        }

        let producer = Producer {
            head: head.freeze(),
            head_read: 0,
            content_stuff,
            body_offset,
            body_len,
            body_sent: 0,
            separator_read: 0,
            end_line: None,
            end_line_read: 0,
        };
        Ok(Self::new(tid, kind, header, Flow::Outgoing(producer)))
    }

    fn producer(&self) -> Option<&Producer> {
        match &self.flow {
            Flow::Outgoing(producer) => Some(producer),
            Flow::Incoming(_) => None,
        }
    }

    fn producer_mut(&mut self) -> Result<&mut Producer, MsrpError> {
        match &mut self.flow {
            Flow::Outgoing(producer) => Ok(producer),
            Flow::Incoming(_) => Err(MsrpError::illegal_use("incoming transactions produce no data")),
        }
    }

    /// Whether any head byte was handed to the connection.
    pub fn has_started(&self) -> bool {
        self.producer().is_some_and(|p| p.head_read > 0)
    }

    pub fn is_head_complete(&self) -> bool {
        self.producer().is_some_and(|p| p.head_read == p.head.len())
    }

    /// Offset and length of the message bytes this transaction was created for.
    pub fn body_range(&self) -> (u64, u64) {
        self.producer().map_or((0, 0), |p| (p.body_offset, p.body_len))
    }

    pub fn body_sent(&self) -> u64 {
        self.producer().map_or(0, |p| p.body_sent)
    }

    /// Body bytes still to produce; zero once interrupted or aborted.
    pub fn body_remaining(&self) -> u64 {
        match self.producer() {
            Some(p) if !self.interrupted && !self.aborted => p.body_len - p.body_sent,
            _ => 0,
        }
    }

    pub fn has_data(&self) -> bool {
        match self.producer() {
            Some(p) => p.head_read < p.head.len() || self.body_remaining() > 0 || self.has_end_line(),
            None => false,
        }
    }

    /// Whether separator or end-line bytes are still to produce.
    pub fn has_end_line(&self) -> bool {
        match self.producer() {
            Some(p) => {
                (p.content_stuff && p.separator_read < SEPARATOR.len()) || p.end_line.as_ref().is_none_or(|end| p.end_line_read < end.len())
            }
            None => false,
        }
    }

    /// The flag the end-line is emitted with, decided when its first byte is produced.
    pub fn end_flag(&self) -> ContinuationFlag {
        if self.aborted {
            ContinuationFlag::Abort
        } else if self.interrupted && self.producer().is_some_and(|p| p.body_sent < p.body_len) {
            ContinuationFlag::Interrupt
        } else {
            self.flag
        }
    }

    /// Flag planned at construction.
    pub fn planned_flag(&self) -> ContinuationFlag {
        self.flag
    }

    /// Copies up to `room` head bytes into `dst`.
    pub fn write_head(&mut self, dst: &mut BytesMut, room: usize) -> Result<usize, MsrpError> {
        let producer = self.producer_mut()?;
        let rest = &producer.head[producer.head_read..];
        let n = rest.len().min(room);
        dst.put_slice(&rest[..n]);
        producer.head_read += n;
        Ok(n)
    }

    /// Reads up to `max` body bytes from the message.
    pub fn read_body(&mut self, max: usize) -> Result<Bytes, MsrpError> {
        let n = self.body_remaining().min(max as u64);
        if n == 0 {
            return Ok(Bytes::new());
        }
        let message = self.message.clone().ok_or_else(|| MsrpError::internal("SEND transaction without message"))?;
        let producer = self.producer_mut()?;
        let offset = producer.body_offset + producer.body_sent;
        let len = usize::try_from(n).map_err(|_| MsrpError::internal("chunk larger than memory"))?;
        let bytes = message.lock().read_body(offset, len)?;
        producer.body_sent += n;
        Ok(bytes)
    }

    /// Gives back `n` body bytes that were read but not sent.
    pub fn rewind_body(&mut self, n: u64) -> Result<(), MsrpError> {
        ensure!(self.kind == TransactionKind::Send, MsrpError::illegal_use(format!("can not rewind a {:?} transaction", self.kind)));
        let producer = self.producer_mut()?;
        ensure!(n <= producer.body_sent, MsrpError::illegal_use(format!("rewind {n} bytes but only {} were read", producer.body_sent)));
        ensure!(producer.end_line.is_none(), MsrpError::illegal_use("rewind after the end-line was started"));
        producer.body_sent -= n;
        Ok(())
    }

    /// Copies up to `room` bytes of separator and end-line into `dst`.
    pub fn write_end_line(&mut self, dst: &mut BytesMut, room: usize) -> Result<usize, MsrpError> {
        let flag = self.end_flag();
        let tid = self.tid.clone();
        let producer = self.producer_mut()?;
        let mut written = 0;

        if producer.content_stuff {
            while producer.separator_read < SEPARATOR.len() && written < room {
                dst.put_u8(SEPARATOR[producer.separator_read]);
                producer.separator_read += 1;
                written += 1;
            }
            if producer.separator_read < SEPARATOR.len() {
                return Ok(written);
            }
        }

        let end = producer.end_line.get_or_insert_with(|| end_line(&tid, flag));
        let rest = &end[producer.end_line_read..];
        let n = rest.len().min(room - written);
        dst.put_slice(&rest[..n]);
        producer.end_line_read += n;
        Ok(written + n)
    }

    /// Cuts the body short, the end-line follows with `+`.
    pub fn interrupt(&mut self) -> Result<(), MsrpError> {
        ensure!(self.interruptible, MsrpError::illegal_use(format!("transaction {} is not interruptible", self.tid)));
        self.interrupted = true;
        Ok(())
    }

    /// Cuts the body short, the end-line follows with `#`.
    pub fn abort(&mut self) -> Result<(), MsrpError> {
        ensure!(self.producer().is_some(), MsrpError::illegal_use("only outgoing transactions can be aborted"));
        self.aborted = true;
        Ok(())
    }
}
