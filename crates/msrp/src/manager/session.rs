use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Weak};

use mime::Mime;
use parking_lot::Mutex;
use tracing::debug;

use crate::manager::{AcceptHook, DefaultAcceptHook, DefaultSessionListener, MsrpStack, SessionListener, TransactionManager};
use crate::protocol::{Direction, FileContainer, MemoryContainer, Message, MessageId, MessageRef, MsrpError, MsrpUri, ResponseCode};
use crate::utils::ensure;

/// One MSRP session: a local URI talking to a peer along a To-Path.
///
/// Messages are sent through the connection the session is bound to; messages
/// sent before binding are kept and flushed at bind time.
pub struct Session {
    stack: Arc<MsrpStack>,
    uri: MsrpUri,
    to_path: Vec<MsrpUri>,
    listener: Arc<dyn SessionListener>,
    accept_hook: Arc<dyn AcceptHook>,
    state: Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    manager: Option<Weak<TransactionManager>>,
    deferred: Vec<MessageRef>,
    sent: HashMap<MessageId, MessageRef>,
    receiving: HashMap<MessageId, MessageRef>,
}

pub struct SessionBuilder {
    stack: Arc<MsrpStack>,
    uri: MsrpUri,
    to_path: Vec<MsrpUri>,
    listener: Arc<dyn SessionListener>,
    accept_hook: Arc<dyn AcceptHook>,
}

impl SessionBuilder {
    /// Path to the peer, the last URI is the peer's own.
    pub fn to_path(mut self, to_path: Vec<MsrpUri>) -> Self {
        self.to_path = to_path;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn accept_hook(mut self, accept_hook: Arc<dyn AcceptHook>) -> Self {
        self.accept_hook = accept_hook;
        self
    }

    pub fn build(self) -> Result<Arc<Session>, MsrpError> {
        ensure!(
            !self.uri.session_id().is_empty(),
            MsrpError::illegal_use(format!("session uri {} has no session id", self.uri))
        );
        Ok(Arc::new(Session {
            stack: self.stack,
            uri: self.uri,
            to_path: self.to_path,
            listener: self.listener,
            accept_hook: self.accept_hook,
            state: Mutex::new(SessionState::default()),
        }))
    }
}

impl Session {
    /// A session for the local `uri`.
    ///
    /// Without a To-Path the session can only receive until the peer's path is
    /// known; sending then fails with [`MsrpError::IllegalUse`].
    pub fn builder(stack: &Arc<MsrpStack>, uri: MsrpUri) -> SessionBuilder {
        SessionBuilder {
            stack: Arc::clone(stack),
            uri,
            to_path: Vec::new(),
            listener: Arc::new(DefaultSessionListener),
            accept_hook: Arc::new(DefaultAcceptHook),
        }
    }

    pub fn uri(&self) -> &MsrpUri {
        &self.uri
    }

    pub fn to_path(&self) -> &[MsrpUri] {
        &self.to_path
    }

    pub fn stack(&self) -> &Arc<MsrpStack> {
        &self.stack
    }

    pub(crate) fn listener(&self) -> &Arc<dyn SessionListener> {
        &self.listener
    }

    pub(crate) fn accept_hook(&self) -> &Arc<dyn AcceptHook> {
        &self.accept_hook
    }

    pub fn is_bound(&self) -> bool {
        self.manager().is_some()
    }

    pub(crate) fn manager(&self) -> Option<Arc<TransactionManager>> {
        self.state.lock().manager.as_ref().and_then(Weak::upgrade)
    }

    /// Sends `content` as one message.
    pub fn send_message(self: &Arc<Self>, content_type: Mime, content: &[u8]) -> Result<MessageRef, MsrpError> {
        self.send(Message::outgoing(content_type, Box::new(MemoryContainer::from_bytes(content))))
    }

    /// Sends the file at `path`, read from disk as chunks go out.
    pub fn send_file<P: AsRef<Path>>(self: &Arc<Self>, content_type: Mime, path: P) -> Result<MessageRef, MsrpError> {
        self.send(Message::outgoing(content_type, Box::new(FileContainer::open(path)?)))
    }

    /// Sends a prepared outgoing message, report flags included.
    pub fn send(self: &Arc<Self>, message: Message) -> Result<MessageRef, MsrpError> {
        ensure!(message.direction() == Direction::Outgoing, MsrpError::illegal_use("only outgoing messages can be sent"));
        ensure!(!self.to_path.is_empty(), MsrpError::illegal_use(format!("session {} has no To-Path", self.uri)));

        let message_id = message.message_id().clone();
        let message = message.into_ref();
        let manager = {
            let mut state = self.state.lock();
            state.sent.insert(message_id.clone(), Arc::clone(&message));
            let manager = state.manager.as_ref().and_then(Weak::upgrade);
            if manager.is_none() {
                debug!(session = %self.uri, %message_id, "session not bound, defer message");
                state.deferred.push(Arc::clone(&message));
            }
            manager
        };

        if let Some(manager) = manager {
            manager.enqueue_message(self, Arc::clone(&message))?;
        }
        Ok(message)
    }

    /// Asks the peer to call us `nickname`, the answer arrives at
    /// [`SessionListener::nickname_result`].
    pub fn request_nickname(self: &Arc<Self>, nickname: &str) -> Result<(), MsrpError> {
        let manager = self.manager().ok_or_else(|| MsrpError::illegal_use(format!("session {} is not bound", self.uri)))?;
        manager.send_nickname(self, nickname)
    }

    /// Stops a message in either direction.
    ///
    /// An outgoing message loses its queued chunks and the chunk on the wire ends
    /// with `#`. An incoming message is dropped and the sender gets a 413 REPORT
    /// unless it declined failure reports. Aborting a finished message does nothing.
    pub fn abort_message(self: &Arc<Self>, message: &MessageRef) -> Result<(), MsrpError> {
        let direction = message.lock().direction();
        match self.manager() {
            Some(manager) if direction == Direction::Incoming => manager.abort_incoming(self, message, ResponseCode::StopSending),
            Some(manager) => manager.abort_message(message).map(|_| ()),
            None => {
                self.state.lock().deferred.retain(|m| !Arc::ptr_eq(m, message));
                message.lock().abort();
                Ok(())
            }
        }
    }

    /// Binds the session to `manager`, returning the messages sent meanwhile.
    pub(crate) fn bind(&self, manager: &Arc<TransactionManager>) -> Vec<MessageRef> {
        let mut state = self.state.lock();
        state.manager = Some(Arc::downgrade(manager));
        std::mem::take(&mut state.deferred)
    }

    pub(crate) fn unbind(&self) {
        self.state.lock().manager = None;
    }

    /// Looks a message up among the sent ones first, then the ones being received.
    pub fn find_message(&self, message_id: &MessageId) -> Option<MessageRef> {
        let state = self.state.lock();
        state.sent.get(message_id).or_else(|| state.receiving.get(message_id)).cloned()
    }

    pub(crate) fn add_receiving(&self, message: MessageRef) {
        let message_id = message.lock().message_id().clone();
        self.state.lock().receiving.insert(message_id, message);
    }

    pub(crate) fn remove_receiving(&self, message_id: &MessageId) {
        self.state.lock().receiving.remove(message_id);
    }

    pub(crate) fn remove_sent(&self, message_id: &MessageId) {
        self.state.lock().sent.remove(message_id);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("uri", &self.uri).field("to_path", &self.to_path).finish_non_exhaustive()
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder").field("uri", &self.uri).field("to_path", &self.to_path).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::protocol::MessageState;

    fn session() -> Arc<Session> {
        let stack = MsrpStack::new(StackConfig::default());
        Session::builder(&stack, MsrpUri::parse("msrp://alicepc.example.com:7777/iau39soe2843z;tcp").unwrap())
            .to_path(vec![MsrpUri::parse("msrp://bob.example.com:8888/9di4eae923wzd;tcp").unwrap()])
            .build()
            .unwrap()
    }

    #[test]
    fn unbound_session_defers_messages() {
        let session = session();
        let message = session.send_message(mime::TEXT_PLAIN, b"hello").unwrap();
        assert!(!session.is_bound());

        let message_id = message.lock().message_id().clone();
        assert!(session.find_message(&message_id).is_some());

        let manager = TransactionManager::new(Arc::clone(session.stack()));
        let deferred = session.bind(&manager);
        assert_eq!(deferred.len(), 1);
        assert!(Arc::ptr_eq(&deferred[0], &message));
        assert!(session.is_bound());
    }

    #[test]
    fn abort_deferred_message() {
        let session = session();
        let message = session.send_message(mime::TEXT_PLAIN, b"hello").unwrap();
        session.abort_message(&message).unwrap();
        assert_eq!(message.lock().state(), MessageState::Aborted);

        let manager = TransactionManager::new(Arc::clone(session.stack()));
        assert!(session.bind(&manager).is_empty());
    }

    #[test]
    fn sending_needs_a_to_path() {
        let stack = MsrpStack::new(StackConfig::default());
        let session = Session::builder(&stack, MsrpUri::parse("msrp://alicepc.example.com:7777/iau39soe2843z;tcp").unwrap()).build().unwrap();
        assert!(matches!(session.send_message(mime::TEXT_PLAIN, b"x"), Err(MsrpError::IllegalUse { .. })));
        assert!(matches!(session.request_nickname("alice"), Err(MsrpError::IllegalUse { .. })));
    }
}
