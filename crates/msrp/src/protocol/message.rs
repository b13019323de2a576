use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use mime::Mime;
use parking_lot::Mutex;
use tracing::debug;

use crate::protocol::{
    ByteRange, ContainerError, Counter, DataContainer, FailureReport, MessageId, MsrpError, MsrpUri, ResponseCode, TransactionId,
};

/// Shared handle to a message; transactions, sessions and listeners all refer to it.
pub type MessageRef = Arc<Mutex<Message>>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Total size of a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MessageSize {
    Known(u64),
    /// The sender announced `*` as total.
    Unknown,
    /// No Byte-Range seen yet.
    #[default]
    Uninitialized,
}

impl MessageSize {
    pub fn known(self) -> Option<u64> {
        match self {
            Self::Known(size) => Some(size),
            _ => None,
        }
    }
}

impl From<Option<u64>> for MessageSize {
    fn from(total: Option<u64>) -> Self {
        total.map_or(Self::Unknown, Self::Known)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageState {
    Active,
    Complete,
    /// Aborted by either side, data discarded.
    Aborted,
    /// Rejected by the accept hook.
    Discarded,
}

/// What is remembered about the last SEND carrying a message.
///
/// Used to address failure reports back to the sender of an incoming message.
#[derive(Debug, Clone)]
pub struct TransactionSnapshot {
    pub tid: TransactionId,
    pub to_path: Vec<MsrpUri>,
    pub from_path: Vec<MsrpUri>,
    pub byte_range: ByteRange,
}

/// One MSRP message, the unit above chunking.
pub struct Message {
    message_id: MessageId,
    content_type: Option<Mime>,
    size: MessageSize,
    direction: Direction,
    success_report: bool,
    failure_report: FailureReport,
    container: Option<Box<dyn DataContainer>>,
    counter: Counter,
    /// outgoing: offset of the next chunk to generate
    next_offset: u64,
    /// outgoing: body bytes written to the connection
    sent_bytes: u64,
    last_send_transaction: Option<TransactionSnapshot>,
    state: MessageState,
    result_code: Option<ResponseCode>,
}

impl Message {
    /// An outgoing message whose body is held by `container`.
    pub fn outgoing(content_type: Mime, container: Box<dyn DataContainer>) -> Self {
        let size = container.size();
        Self {
            message_id: MessageId::generate(),
            content_type: Some(content_type),
            size: MessageSize::Known(size),
            direction: Direction::Outgoing,
            success_report: false,
            failure_report: FailureReport::Yes,
            container: Some(container),
            counter: Counter::with_size(size),
            next_offset: 0,
            sent_bytes: 0,
            last_send_transaction: None,
            state: MessageState::Active,
            result_code: None,
        }
    }

    /// An incoming message announced by the first chunk seen.
    pub fn incoming(message_id: MessageId, content_type: Option<Mime>, size: MessageSize) -> Self {
        let counter = match size {
            MessageSize::Known(size) => Counter::with_size(size),
            _ => Counter::unbounded(),
        };
        Self {
            message_id,
            content_type,
            size,
            direction: Direction::Incoming,
            success_report: false,
            failure_report: FailureReport::Yes,
            container: None,
            counter,
            next_offset: 0,
            sent_bytes: 0,
            last_send_transaction: None,
            state: MessageState::Active,
            result_code: None,
        }
    }

    pub fn into_ref(self) -> MessageRef {
        Arc::new(Mutex::new(self))
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    pub fn size(&self) -> MessageSize {
        self.size
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub fn success_report(&self) -> bool {
        self.success_report
    }

    pub fn set_success_report(&mut self, success_report: bool) {
        self.success_report = success_report;
    }

    pub fn failure_report(&self) -> FailureReport {
        self.failure_report
    }

    pub fn set_failure_report(&mut self, failure_report: FailureReport) {
        self.failure_report = failure_report;
    }

    pub fn counter(&self) -> &Counter {
        &self.counter
    }

    pub fn counter_mut(&mut self) -> &mut Counter {
        &mut self.counter
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub(crate) fn advance_next_offset(&mut self, len: u64) {
        self.next_offset += len;
    }

    pub fn last_send_transaction(&self) -> Option<&TransactionSnapshot> {
        self.last_send_transaction.as_ref()
    }

    pub(crate) fn set_last_send_transaction(&mut self, snapshot: TransactionSnapshot) {
        self.last_send_transaction = Some(snapshot);
    }

    /// The code the message was refused or failed with.
    pub fn result_code(&self) -> Option<ResponseCode> {
        self.result_code
    }

    /// Records why the message was refused or failed.
    ///
    /// Accept hooks call it together with returning `false`.
    pub fn reject(&mut self, code: ResponseCode) {
        self.result_code = Some(code);
    }

    pub fn has_data_container(&self) -> bool {
        self.container.is_some()
    }

    pub fn set_data_container(&mut self, container: Box<dyn DataContainer>) {
        self.container = Some(container);
    }

    pub fn data_container_mut(&mut self) -> Option<&mut (dyn DataContainer + 'static)> {
        self.container.as_deref_mut()
    }

    /// Complete body of the message.
    pub fn content(&mut self) -> Result<Bytes, MsrpError> {
        let container = self.container.as_deref_mut().ok_or_else(|| MsrpError::illegal_use("message has no data container"))?;
        match self.size {
            MessageSize::Known(size) => {
                let size = usize::try_from(size).map_err(|_| MsrpError::internal("message too large for memory"))?;
                Ok(container.get_at(0, size)?)
            }
            _ => Ok(container.read_all()?),
        }
    }

    /// Reads `len` body bytes at `offset`, for outgoing transactions.
    pub(crate) fn read_body(&mut self, offset: u64, len: usize) -> Result<Bytes, MsrpError> {
        let container = self.container.as_deref_mut().ok_or_else(|| MsrpError::illegal_use("message has no data container"))?;
        Ok(container.get_at(offset, len)?)
    }

    /// Writes received body bytes at `offset`.
    pub(crate) fn write_body(&mut self, offset: u64, data: &[u8]) -> Result<(), MsrpError> {
        let container = self.container.as_deref_mut().ok_or(ContainerError::Disposed)?;
        Ok(container.put_at(offset, data)?)
    }

    /// Adds `count` body bytes written to the connection.
    pub fn record_sent(&mut self, count: u64) {
        self.sent_bytes += count;
    }

    pub fn is_complete(&self) -> bool {
        match self.direction {
            Direction::Outgoing => self.size.known() == Some(self.sent_bytes),
            Direction::Incoming => self.counter.is_complete(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state == MessageState::Aborted
    }

    /// Fixes the size of an incoming message when the first chunk carries a total.
    pub(crate) fn update_size(&mut self, total: Option<u64>) {
        if let (MessageSize::Unknown | MessageSize::Uninitialized, Some(total)) = (self.size, total) {
            self.size = MessageSize::Known(total);
            self.counter.set_size(total);
        }
    }

    /// Checks a received message before it is handed to the session.
    pub fn validate(&mut self) -> Result<(), MsrpError> {
        if self.direction != Direction::Incoming {
            return Err(MsrpError::illegal_use("only incoming messages are validated"));
        }
        if !self.counter.is_complete() {
            return Err(MsrpError::illegal_use(format!("message {} is not complete", self.message_id)));
        }
        if self.size.known().is_none() {
            self.size = MessageSize::Known(self.counter.count());
        }
        self.state = MessageState::Complete;
        Ok(())
    }

    /// Outgoing message fully written to the connection; its body is no longer needed.
    ///
    /// Returns whether the message moved to `Complete`.
    pub(crate) fn mark_sent(&mut self) -> bool {
        if self.state != MessageState::Active {
            return false;
        }
        self.state = MessageState::Complete;
        self.dispose_container();
        true
    }

    /// Aborts the transfer and releases the data container.
    ///
    /// Aborting a completed message is a no-op; returns whether the state changed.
    pub fn abort(&mut self) -> bool {
        if self.state != MessageState::Active {
            debug!(message_id = %self.message_id, state = ?self.state, "ignore abort of inactive message");
            return false;
        }
        self.state = MessageState::Aborted;
        self.dispose_container();
        true
    }

    /// Drops the message after the accept hook refused it.
    pub fn discard(&mut self) {
        self.state = MessageState::Discarded;
        self.dispose_container();
    }

    fn dispose_container(&mut self) {
        if let Some(mut container) = self.container.take() {
            container.dispose();
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_id", &self.message_id)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MemoryContainer;

    #[test]
    fn outgoing_message_completes_on_sent_bytes() {
        let mut message = Message::outgoing(mime::TEXT_PLAIN, Box::new(MemoryContainer::from_bytes(&b"hello world"[..])));
        assert_eq!(message.size(), MessageSize::Known(11));
        assert!(!message.is_complete());
        message.record_sent(6);
        assert!(!message.is_complete());
        message.record_sent(5);
        assert!(message.is_complete());
        assert_eq!(&message.read_body(6, 5).unwrap()[..], b"world");
    }

    #[test]
    fn incoming_message_unknown_size() {
        let mut message = Message::incoming(MessageId::parse("abcd1234").unwrap(), None, MessageSize::Unknown);
        message.set_data_container(Box::new(MemoryContainer::growable(64)));
        message.write_body(0, b"abc").unwrap();
        message.counter_mut().register(0, 3);
        message.counter_mut().received_end_of_message();
        message.validate().unwrap();
        assert_eq!(message.size(), MessageSize::Known(3));
        assert_eq!(&message.content().unwrap()[..], b"abc");
    }

    #[test]
    fn abort_is_terminal() {
        let mut message = Message::outgoing(mime::TEXT_PLAIN, Box::new(MemoryContainer::from_bytes(&b"x"[..])));
        assert!(message.abort());
        assert!(message.is_aborted());
        assert!(!message.has_data_container());
        assert!(!message.abort());
    }

    #[test]
    fn validate_rejects_incomplete() {
        let mut message = Message::incoming(MessageId::parse("abcd1234").unwrap(), None, MessageSize::Known(4));
        message.counter_mut().register(0, 2);
        message.counter_mut().received_end_of_message();
        assert!(matches!(message.validate(), Err(MsrpError::IllegalUse { .. })));
    }
}
