use tracing::{debug, info, warn};

use crate::manager::Session;
use crate::protocol::{ByteRange, Message, MessageId, MessageRef, ResponseCode, StatusHeader};

/// Why a message stopped before it was complete.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The peer ended a chunk with `#`.
    PeerAborted,
    /// The peer answered a chunk with an error response, or never answered.
    ErrorResponse(ResponseCode),
}

/// A REPORT received for one of our messages.
#[derive(Debug, Clone)]
pub struct ReceivedReport {
    pub message_id: MessageId,
    pub status: Option<StatusHeader>,
    pub byte_range: Option<ByteRange>,
    pub message: Option<MessageRef>,
}

/// Application callbacks of one session.
///
/// Callbacks run on the connection task and never while the stack holds a lock, so
/// they may call back into the session.
#[cfg_attr(test, mockall::automock)]
pub trait SessionListener: Send + Sync {
    /// A message was received completely and validated.
    fn received_message(&self, session: &Session, message: MessageRef);

    fn received_report(&self, session: &Session, report: &ReceivedReport);

    /// Not called for aborts requested through [`Session::abort_message`].
    fn aborted_message(&self, session: &Session, message: MessageRef, reason: AbortReason);

    /// Progress of an outgoing message, `sent_bytes` body bytes are on the wire.
    fn update_send_status(&self, session: &Session, message: MessageRef, sent_bytes: u64);

    /// The peer asks to be called `nickname`; the returned code answers the request.
    fn received_nickname(&self, session: &Session, nickname: &str) -> ResponseCode;

    /// Answer to a nickname we requested.
    fn nickname_result(&self, session: &Session, code: ResponseCode, comment: Option<String>);

    fn connection_lost(&self, session: &Session, cause: Option<String>);
}

/// Logs every event and accepts every nickname.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionListener;

impl SessionListener for DefaultSessionListener {
    fn received_message(&self, session: &Session, message: MessageRef) {
        let message = message.lock();
        info!(session = %session.uri(), message_id = %message.message_id(), size = ?message.size(), "received message");
    }

    fn received_report(&self, session: &Session, report: &ReceivedReport) {
        debug!(session = %session.uri(), message_id = %report.message_id, status = ?report.status, "received report");
    }

    fn aborted_message(&self, session: &Session, message: MessageRef, reason: AbortReason) {
        let message = message.lock();
        warn!(session = %session.uri(), message_id = %message.message_id(), ?reason, "message aborted");
    }

    fn update_send_status(&self, session: &Session, message: MessageRef, sent_bytes: u64) {
        let message = message.lock();
        debug!(session = %session.uri(), message_id = %message.message_id(), sent_bytes, "send progress");
    }

    fn received_nickname(&self, session: &Session, nickname: &str) -> ResponseCode {
        info!(session = %session.uri(), nickname, "peer uses nickname");
        ResponseCode::Ok
    }

    fn nickname_result(&self, session: &Session, code: ResponseCode, comment: Option<String>) {
        info!(session = %session.uri(), %code, ?comment, "nickname request answered");
    }

    fn connection_lost(&self, session: &Session, cause: Option<String>) {
        warn!(session = %session.uri(), ?cause, "connection lost");
    }
}

/// Decides whether an incoming message is accepted.
///
/// An accepting hook must attach a data container to the message. A refusing hook
/// may set the code the SEND is answered with through [`Message::reject`], 413 is
/// used otherwise.
pub trait AcceptHook: Send + Sync {
    fn accept(&self, session: &Session, message: &mut Message) -> bool;
}

impl<F> AcceptHook for F
where
    F: Fn(&Session, &mut Message) -> bool + Send + Sync,
{
    fn accept(&self, session: &Session, message: &mut Message) -> bool {
        self(session, message)
    }
}

/// Accepts every message, storing it where [`MsrpStack::new_container`] decides.
///
/// [`MsrpStack::new_container`]: crate::manager::MsrpStack::new_container
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAcceptHook;

impl AcceptHook for DefaultAcceptHook {
    fn accept(&self, session: &Session, message: &mut Message) -> bool {
        match session.stack().new_container(message.size()) {
            Ok(container) => {
                message.set_data_container(container);
                true
            }
            Err(e) => {
                warn!(session = %session.uri(), message_id = %message.message_id(), cause = %e, "no storage for incoming message");
                message.reject(ResponseCode::StopSending);
                false
            }
        }
    }
}
