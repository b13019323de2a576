use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

use crate::codec::{EndLineScanner, HeaderDecoder, HeaderTarget, sniff_failure_report};
use crate::config::MIN_OUTPUT_BUFFER_SIZE;
use crate::manager::{AbortReason, MsrpStack, ReceivedReport, Session};
use crate::protocol::{
    ByteRange, ContinuationFlag, Direction, FailureReport, Message, MessageId, MessageRef, MessageState, MsrpError, MsrpUri, ResponseCode,
    TransactionId, TransactionSnapshot,
};
use crate::transaction::{Transaction, TransactionKind};
use crate::utils::ensure;

/// What the peer owes us for a transaction we sent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Expect {
    Response,
    ErrorResponse,
    Nothing,
}

impl From<FailureReport> for Expect {
    fn from(failure_report: FailureReport) -> Self {
        match failure_report {
            FailureReport::Yes => Self::Response,
            FailureReport::Partial => Self::ErrorResponse,
            FailureReport::No => Self::Nothing,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Outgoing {
    Send,
    Nickname,
    Report,
}

/// A transaction we originated, kept until it is answered or can no longer be.
struct InFlight {
    kind: Outgoing,
    session: Arc<Session>,
    message: Option<MessageRef>,
    expect: Expect,
    /// set once the end-line left
    sent_at: Option<Instant>,
}

#[derive(Default)]
struct ManagerState {
    queue: VecDeque<Transaction>,
    in_flight: HashMap<TransactionId, InFlight>,
    sessions: HashMap<MsrpUri, Arc<Session>>,
    scanner: Option<(TransactionId, EndLineScanner)>,
}

/// Listener notifications, collected under the lock and dispatched after it.
enum Event {
    ReceivedMessage(Arc<Session>, MessageRef),
    ReceivedReport(Arc<Session>, ReceivedReport),
    Aborted(Arc<Session>, MessageRef, AbortReason),
    SendStatus(Arc<Session>, MessageRef, u64),
    NicknameResult(Arc<Session>, ResponseCode, Option<String>),
    ConnectionLost(Arc<Session>, Option<String>),
}

/// Per-connection scheduler and request router.
///
/// Outgoing transactions wait in one queue which the writer drains through
/// [`get_data_to_send`](Self::get_data_to_send). Responses and REPORTs are inserted
/// ahead of SEND chunks, interrupting a chunk already on the wire. Incoming
/// transactions are routed to their session by
/// [`process_header`](Self::process_header) and answered by
/// [`transaction_complete`](Self::transaction_complete).
pub struct TransactionManager {
    stack: Arc<MsrpStack>,
    decoder: HeaderDecoder,
    state: Mutex<ManagerState>,
    notify: Notify,
    closed: AtomicBool,
}

impl TransactionManager {
    pub fn new(stack: Arc<MsrpStack>) -> Arc<Self> {
        let decoder = HeaderDecoder::new(stack.config().strict_report_headers);
        Arc::new(Self { stack, decoder, state: Mutex::new(ManagerState::default()), notify: Notify::new(), closed: AtomicBool::new(false) })
    }

    pub fn stack(&self) -> &Arc<MsrpStack> {
        &self.stack
    }

    /// Binds `session` to this connection and queues the messages it deferred.
    pub fn bind_session(self: &Arc<Self>, session: &Arc<Session>) -> Result<(), MsrpError> {
        ensure!(!self.is_closed(), MsrpError::ConnectionClosed);
        self.bind_locked(&mut self.state.lock(), session)?;
        self.notify.notify_one();
        Ok(())
    }

    fn bind_locked(self: &Arc<Self>, state: &mut ManagerState, session: &Arc<Session>) -> Result<(), MsrpError> {
        if state.sessions.contains_key(session.uri()) {
            return Ok(());
        }
        ensure!(
            self.stack.activate(session.uri()),
            MsrpError::illegal_use(format!("session {} is bound to another connection", session.uri()))
        );

        state.sessions.insert(session.uri().clone(), Arc::clone(session));
        let deferred = session.bind(self);
        info!(session = %session.uri(), deferred = deferred.len(), "session bound to connection");
        for message in &deferred {
            self.generate_transactions_to_send(state, session, message)?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn has_data_to_send(&self) -> bool {
        !self.state.lock().queue.is_empty()
    }

    pub(crate) fn enqueue_message(&self, session: &Arc<Session>, message: MessageRef) -> Result<(), MsrpError> {
        ensure!(!self.is_closed(), MsrpError::ConnectionClosed);
        self.generate_transactions_to_send(&mut self.state.lock(), session, &message)?;
        self.notify.notify_one();
        Ok(())
    }

    pub(crate) fn send_nickname(&self, session: &Arc<Session>, nickname: &str) -> Result<(), MsrpError> {
        ensure!(!self.is_closed(), MsrpError::ConnectionClosed);
        {
            let mut state = self.state.lock();
            let tid = new_tid(&state);
            let transaction = Transaction::nickname(tid.clone(), Arc::clone(session), nickname)?;
            state.in_flight.insert(
                tid,
                InFlight { kind: Outgoing::Nickname, session: Arc::clone(session), message: None, expect: Expect::Response, sent_at: None },
            );
            add_priority_locked(&mut state, transaction)?;
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Splits the unsent part of `message` into SEND chunks at the back of the queue.
    fn generate_transactions_to_send(&self, state: &mut ManagerState, session: &Arc<Session>, message: &MessageRef) -> Result<(), MsrpError> {
        let (size, offset, active) = {
            let message = message.lock();
            (message.size().known().unwrap_or(0), message.next_offset(), message.state() == MessageState::Active)
        };
        if !active {
            debug!(session = %session.uri(), "skip inactive message");
            return Ok(());
        }

        let plan = chunk_plan(offset, size, self.stack.config().chunk_size(), true);
        trace!(session = %session.uri(), chunks = plan.len(), size, "generate chunks");
        for (offset, len, last) in plan {
            let transaction = self.new_chunk(state, session, message, offset, len, last)?;
            state.queue.push_back(transaction);
        }
        message.lock().advance_next_offset(size - offset);
        Ok(())
    }

    /// Queues the part of an interrupted chunk that never left, ahead of the
    /// remaining chunks.
    fn regenerate_tail(&self, state: &mut ManagerState, interrupted: &Transaction) -> Result<(), MsrpError> {
        let (offset, len) = interrupted.body_range();
        let sent = interrupted.body_sent();
        let (Some(session), Some(message)) = (interrupted.session(), interrupted.message()) else {
            return Ok(());
        };
        if sent >= len || message.lock().state() != MessageState::Active {
            return Ok(());
        }

        let ends_message = interrupted.planned_flag() == ContinuationFlag::End;
        let plan = chunk_plan(offset + sent, offset + len, self.stack.config().chunk_size(), ends_message);
        let at = state.queue.iter().position(Transaction::is_interruptible).unwrap_or(state.queue.len());
        debug!(tid = %interrupted.tid(), offset = offset + sent, len = len - sent, "requeue rest of interrupted chunk");
        for (i, (offset, len, last)) in plan.into_iter().enumerate() {
            let transaction = self.new_chunk(state, session, message, offset, len, last)?;
            state.queue.insert(at + i, transaction);
        }
        Ok(())
    }

    fn new_chunk(
        &self,
        state: &mut ManagerState,
        session: &Arc<Session>,
        message: &MessageRef,
        offset: u64,
        len: u64,
        last: bool,
    ) -> Result<Transaction, MsrpError> {
        let tid = new_tid(state);
        let transaction = Transaction::send_chunk(tid.clone(), Arc::clone(session), Arc::clone(message), offset, len, last)?;
        let expect = Expect::from(transaction.header().failure_report);
        state.in_flight.insert(
            tid,
            InFlight { kind: Outgoing::Send, session: Arc::clone(session), message: Some(Arc::clone(message)), expect, sent_at: None },
        );
        Ok(transaction)
    }

    /// Inserts a response or REPORT ahead of every SEND chunk.
    ///
    /// A chunk that already started is interrupted, its rest is sent after.
    pub fn add_priority_transaction(&self, transaction: Transaction) -> Result<(), MsrpError> {
        ensure!(!self.is_closed(), MsrpError::ConnectionClosed);
        add_priority_locked(&mut self.state.lock(), transaction)?;
        self.notify.notify_one();
        Ok(())
    }

    fn send_report<F>(&self, session: &Arc<Session>, message: &MessageRef, build: F) -> Result<(), MsrpError>
    where
        F: FnOnce(TransactionId) -> Result<Transaction, MsrpError>,
    {
        ensure!(!self.is_closed(), MsrpError::ConnectionClosed);
        {
            let mut state = self.state.lock();
            let tid = new_tid(&state);
            let report = build(tid.clone())?;
            state.in_flight.insert(
                tid,
                InFlight {
                    kind: Outgoing::Report,
                    session: Arc::clone(session),
                    message: Some(Arc::clone(message)),
                    expect: Expect::Nothing,
                    sent_at: None,
                },
            );
            add_priority_locked(&mut state, report)?;
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Packs queued transactions into `dst`, appending at most `capacity` bytes.
    ///
    /// Body bytes pass an end-line scanner; a body sequence that would read as this
    /// transaction's end-line interrupts the chunk right before it. Returns the
    /// number of bytes appended.
    pub fn get_data_to_send(&self, dst: &mut BytesMut, capacity: usize) -> Result<usize, MsrpError> {
        ensure!(capacity >= MIN_OUTPUT_BUFFER_SIZE, MsrpError::illegal_use(format!("output capacity {capacity} below {MIN_OUTPUT_BUFFER_SIZE}")));
        let start = dst.len();
        let mut events = Vec::new();
        let result = self.pack(&mut self.state.lock(), dst, start + capacity, &mut events);
        dispatch(events);
        result.map(|()| dst.len() - start)
    }

    fn pack(&self, state: &mut ManagerState, dst: &mut BytesMut, limit: usize, events: &mut Vec<Event>) -> Result<(), MsrpError> {
        loop {
            let Some(head) = state.queue.front_mut() else {
                return Ok(());
            };
            if !head.has_data() {
                if let Some(sent) = state.queue.pop_front() {
                    self.transaction_sent(state, &sent);
                }
                continue;
            }

            let room = limit.saturating_sub(dst.len());
            if room == 0 {
                return Ok(());
            }

            if state.scanner.as_ref().is_some_and(|(tid, _)| tid != head.tid()) {
                state.scanner = None;
            }
            let (_, scanner) = state.scanner.get_or_insert_with(|| (head.tid().clone(), EndLineScanner::new(head.tid())));

            if !head.is_head_complete() {
                head.write_head(dst, room)?;
                if head.is_head_complete() {
                    scanner.reset(true);
                }
                continue;
            }

            if head.body_remaining() == 0 {
                head.write_end_line(dst, room)?;
                continue;
            }

            let body = head.read_body(room)?;
            let read = body.len();
            dst.extend_from_slice(&body);

            let collision = body.iter().enumerate().find_map(|(i, b)| scanner.feed(*b).map(|fed| (i, fed)));
            let kept = match collision {
                Some((at, fed)) => {
                    let kept = (at + 1).saturating_sub(fed);
                    head.rewind_body((read - kept) as u64)?;
                    head.interrupt()?;
                    let (offset, _) = head.body_range();
                    debug!(tid = %head.tid(), offset = offset + head.body_sent(), "end-line collision in body, split transaction");
                    kept
                }
                None if head.body_remaining() > 0 => {
                    // buffer full, a partial match waits for the bytes deciding it
                    let pending = scanner.pending().min(read);
                    if pending > 0 {
                        head.rewind_body(pending as u64)?;
                        scanner.rewind();
                    }
                    read - pending
                }
                None => read,
            };
            dst.truncate(dst.len() - (read - kept));
            self.count_sent(head, kept as u64, events);

            if collision.is_none() && head.body_remaining() > 0 {
                return Ok(());
            }
        }
    }

    fn count_sent(&self, transaction: &Transaction, count: u64, events: &mut Vec<Event>) {
        let (Some(message), Some(session)) = (transaction.message(), transaction.session()) else {
            return;
        };
        if count == 0 {
            return;
        }

        let mechanism = self.stack.report_mechanism();
        let mut guard = message.lock();
        let previous = guard.sent_bytes();
        mechanism.count_sent_body_bytes(&mut guard, count);
        if mechanism.should_trigger_sent_hook(&guard, previous) {
            events.push(Event::SendStatus(Arc::clone(session), Arc::clone(message), guard.sent_bytes()));
        }
    }

    /// The last byte of `transaction` went to the output buffer.
    fn transaction_sent(&self, state: &mut ManagerState, transaction: &Transaction) {
        trace!(tid = %transaction.tid(), kind = ?transaction.kind(), flag = ?transaction.end_flag(), "transaction sent");
        let tid = transaction.tid();
        match state.in_flight.get(tid).map(|entry| entry.expect) {
            Some(Expect::Nothing) => {
                state.in_flight.remove(tid);
            }
            Some(Expect::Response | Expect::ErrorResponse) => {
                if let Some(entry) = state.in_flight.get_mut(tid) {
                    entry.sent_at = Some(Instant::now());
                }
            }
            None => {}
        }

        if *transaction.kind() != TransactionKind::Send {
            return;
        }
        let Some(message) = transaction.message() else {
            return;
        };
        if transaction.is_interrupted() && !transaction.is_aborted() {
            if let Err(e) = self.regenerate_tail(state, transaction) {
                warn!(tid = %tid, cause = %e, "failed to requeue rest of interrupted chunk");
            }
        } else if transaction.end_flag() == ContinuationFlag::End {
            let released = {
                let mut message = message.lock();
                (message.is_complete() && message.mark_sent() && !message.success_report()).then(|| message.message_id().clone())
            };
            // only a success REPORT still looks the message up
            if let (Some(message_id), Some(session)) = (released, transaction.session()) {
                session.remove_sent(&message_id);
            }
        }
    }

    /// Recognizes the header of an incoming transaction and routes it to a session.
    ///
    /// Problems turn the transaction invalid with the code it is answered with once
    /// complete; they never fail the connection.
    pub fn process_header(self: &Arc<Self>, transaction: &mut Transaction, block: &[u8], content_stuff: bool) {
        if let Err(e) = transaction.header_complete(content_stuff) {
            warn!(tid = %transaction.tid(), cause = %e, "unexpected header");
            return;
        }

        let method = transaction.kind().method();
        let target = method.as_ref().map_or(HeaderTarget::Response, HeaderTarget::Request);
        match self.decoder.decode(block, target) {
            Ok(header) => transaction.set_header(header),
            Err(e) => {
                warn!(tid = %transaction.tid(), cause = %e, "invalid transaction header");
                let mut header = self.decoder.decode(block, HeaderTarget::Response).unwrap_or_default();
                header.failure_report = sniff_failure_report(block);
                transaction.set_header(header);
                transaction.invalidate(ResponseCode::BadRequest);
                return;
            }
        }

        match transaction.kind() {
            TransactionKind::Response { .. } => return,
            TransactionKind::Unsupported(method) => {
                debug!(tid = %transaction.tid(), %method, "unsupported method");
                transaction.invalidate(ResponseCode::NotImplemented);
                return;
            }
            _ => {}
        }

        let session = match self.resolve_session(transaction) {
            Ok(session) => session,
            Err(code) => {
                transaction.invalidate(code);
                return;
            }
        };
        transaction.set_session(Arc::clone(&session));
        if matches!(transaction.kind(), TransactionKind::Send | TransactionKind::Report) {
            self.associate_message(transaction, &session);
        }
    }

    fn resolve_session(self: &Arc<Self>, transaction: &Transaction) -> Result<Arc<Session>, ResponseCode> {
        let Some(uri) = transaction.header().to_path.first() else {
            return Err(ResponseCode::BadRequest);
        };

        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get(uri) {
            return Ok(Arc::clone(session));
        }

        if let Some(session) = self.stack.take_pending(uri) {
            if self.stack.is_active(uri) {
                warn!(tid = %transaction.tid(), session = %uri, "pending session is active on another connection");
                return Err(ResponseCode::WrongConnection);
            }
            if let Err(e) = self.bind_locked(&mut state, &session) {
                warn!(tid = %transaction.tid(), session = %uri, cause = %e, "failed to bind pending session");
                return Err(ResponseCode::WrongConnection);
            }
            drop(state);
            self.notify.notify_one();
            return Ok(session);
        }

        if self.stack.is_active(uri) {
            warn!(tid = %transaction.tid(), session = %uri, "request for a session of another connection");
            Err(ResponseCode::WrongConnection)
        } else {
            debug!(tid = %transaction.tid(), session = %uri, "request for unknown session");
            Err(ResponseCode::SessionDoesNotExist)
        }
    }

    fn associate_message(&self, transaction: &mut Transaction, session: &Arc<Session>) {
        let header = transaction.header();
        let Some(message_id) = header.message_id.clone() else {
            transaction.invalidate(ResponseCode::BadRequest);
            return;
        };
        let range = header.byte_range_or_default();
        let snapshot = TransactionSnapshot {
            tid: transaction.tid().clone(),
            to_path: header.to_path.clone(),
            from_path: header.from_path.clone(),
            byte_range: range,
        };
        let is_send = *transaction.kind() == TransactionKind::Send;
        if is_send && range.total.is_some_and(|total| range.start > total.saturating_add(1)) {
            debug!(tid = %transaction.tid(), %message_id, %range, "Byte-Range starts past the message end");
            transaction.invalidate(ResponseCode::BadRequest);
            return;
        }

        let found = match session.find_message(&message_id) {
            Some(message) if is_send && is_aborted_incoming(&message) => {
                debug!(tid = %transaction.tid(), %message_id, "message id of an aborted message reused, receive it anew");
                session.remove_receiving(&message_id);
                None
            }
            found => found,
        };

        match found {
            Some(message) if is_send => {
                let refusal = {
                    let mut guard = message.lock();
                    if guard.direction() != Direction::Incoming {
                        Some(ResponseCode::BadRequest)
                    } else if guard.state() != MessageState::Active {
                        Some(ResponseCode::StopSending)
                    } else {
                        guard.update_size(range.total);
                        guard.set_last_send_transaction(snapshot);
                        None
                    }
                };
                match refusal {
                    Some(code) => {
                        debug!(tid = %transaction.tid(), %message_id, %code, "chunk for a message not being received");
                        transaction.invalidate(code);
                    }
                    None => transaction.set_message(message),
                }
            }
            Some(message) => transaction.set_message(message),
            None if is_send => self.accept_message(transaction, session, message_id, range, snapshot),
            None => {
                warn!(tid = %transaction.tid(), %message_id, "REPORT for unknown message");
                transaction.invalidate(ResponseCode::BadRequest);
            }
        }
    }

    fn accept_message(
        &self,
        transaction: &mut Transaction,
        session: &Arc<Session>,
        message_id: MessageId,
        range: ByteRange,
        snapshot: TransactionSnapshot,
    ) {
        let header = transaction.header();
        let mut message = Message::incoming(message_id, header.content_type.clone(), range.total.into());
        message.set_success_report(header.success_report);
        message.set_failure_report(header.failure_report);
        message.set_last_send_transaction(snapshot);

        if session.accept_hook().accept(session, &mut message) && message.has_data_container() {
            trace!(tid = %transaction.tid(), message_id = %message.message_id(), "incoming message accepted");
            let message = message.into_ref();
            session.add_receiving(Arc::clone(&message));
            transaction.set_message(message);
        } else {
            let code = message.result_code().unwrap_or(ResponseCode::StopSending);
            info!(tid = %transaction.tid(), message_id = %message.message_id(), %code, "incoming message refused");
            message.discard();
            transaction.invalidate(code);
        }
    }

    /// Handles an incoming transaction whose end-line was received.
    pub fn transaction_complete(&self, transaction: Transaction) {
        trace!(tid = %transaction.tid(), kind = ?transaction.kind(), valid = transaction.is_valid(), "incoming transaction complete");
        let mut events = Vec::new();
        match transaction.kind() {
            TransactionKind::Response { .. } => self.process_response(&transaction, &mut events),
            TransactionKind::Report if !transaction.is_valid() => {
                debug!(tid = %transaction.tid(), code = ?transaction.response_code(), "drop invalid REPORT");
            }
            _ if !transaction.is_valid() => self.respond(&transaction, transaction.response_code().unwrap_or(ResponseCode::BadRequest)),
            TransactionKind::Send => self.process_send(&transaction, &mut events),
            TransactionKind::Report => self.process_report(&transaction, &mut events),
            TransactionKind::Nickname => self.process_nickname(&transaction),
            TransactionKind::Unsupported(_) => self.respond(&transaction, ResponseCode::NotImplemented),
        }
        dispatch(events);
    }

    /// Answers `request` with `code` as far as its Failure-Report allows.
    fn respond(&self, request: &Transaction, code: ResponseCode) {
        let wanted = match request.header().failure_report {
            FailureReport::Yes => true,
            FailureReport::Partial => !code.is_success(),
            FailureReport::No => false,
        };
        if !wanted {
            trace!(tid = %request.tid(), %code, "response not wanted");
            return;
        }

        let result = Transaction::response_to(request, code, None).and_then(|response| self.add_priority_transaction(response));
        if let Err(e) = result {
            warn!(tid = %request.tid(), %code, cause = %e, "failed to answer transaction");
        }
    }

    fn process_send(&self, transaction: &Transaction, events: &mut Vec<Event>) {
        self.respond(transaction, ResponseCode::Ok);
        let (Some(message), Some(session)) = (transaction.message(), transaction.session()) else {
            return;
        };

        if transaction.received_flag() == Some(ContinuationFlag::Abort) {
            let (aborted, message_id) = {
                let mut message = message.lock();
                (message.abort(), message.message_id().clone())
            };
            session.remove_receiving(&message_id);
            if aborted {
                info!(tid = %transaction.tid(), %message_id, "peer aborted message");
                events.push(Event::Aborted(Arc::clone(session), Arc::clone(message), AbortReason::PeerAborted));
            }
            return;
        }

        let (message_id, wants_report) = {
            let mut guard = message.lock();
            if guard.state() != MessageState::Active || !guard.is_complete() {
                return;
            }
            if let Err(e) = guard.validate() {
                warn!(tid = %transaction.tid(), message_id = %guard.message_id(), cause = %e, "received message is invalid");
                return;
            }
            (guard.message_id().clone(), self.stack.report_mechanism().should_generate_report(&guard))
        };

        session.remove_receiving(&message_id);
        if wants_report {
            let result = self.send_report(session, message, |tid| Transaction::success_report(tid, Arc::clone(session), message));
            if let Err(e) = result {
                warn!(%message_id, cause = %e, "failed to send success report");
            }
        }
        debug!(tid = %transaction.tid(), %message_id, "message received");
        events.push(Event::ReceivedMessage(Arc::clone(session), Arc::clone(message)));
    }

    fn process_report(&self, transaction: &Transaction, events: &mut Vec<Event>) {
        let Some(session) = transaction.session() else {
            return;
        };
        let header = transaction.header();
        let Some(message_id) = header.message_id.clone() else {
            return;
        };

        let failed = header.status.as_ref().is_some_and(|status| !status.code().is_success());
        if let Some(message) = transaction.message() {
            let direction = message.lock().direction();
            match direction {
                Direction::Outgoing if failed => {
                    let code = header.status.as_ref().map_or(ResponseCode::BadRequest, |status| status.code());
                    message.lock().reject(code);
                    if self.cancel_locked(&mut self.state.lock(), message) {
                        info!(tid = %transaction.tid(), %message_id, %code, "failure report cancels message");
                        self.notify.notify_one();
                    }
                }
                Direction::Outgoing if message.lock().state() == MessageState::Complete => session.remove_sent(&message_id),
                _ => {}
            }
        }

        let report = ReceivedReport { message_id, status: header.status.clone(), byte_range: header.byte_range, message: transaction.message().cloned() };
        events.push(Event::ReceivedReport(Arc::clone(session), report));
    }

    fn process_nickname(&self, transaction: &Transaction) {
        let Some(session) = transaction.session() else {
            return;
        };
        let code = match transaction.header().nickname.as_deref() {
            Some(nickname) => session.listener().received_nickname(session, nickname),
            None => ResponseCode::BadRequest,
        };
        self.respond(transaction, code);
    }

    fn process_response(&self, transaction: &Transaction, events: &mut Vec<Event>) {
        let Some((code, comment)) = transaction.status() else {
            return;
        };
        let entry = self.state.lock().in_flight.remove(transaction.tid());
        let Some(entry) = entry else {
            warn!(tid = %transaction.tid(), %code, "response for unknown transaction");
            return;
        };

        match entry.kind {
            Outgoing::Send if code.is_success() => trace!(tid = %transaction.tid(), "chunk acknowledged"),
            Outgoing::Send => {
                if let Some(message) = entry.message {
                    self.fail_message(entry.session, message, code, events);
                }
            }
            Outgoing::Nickname => events.push(Event::NicknameResult(entry.session, code, comment.map(str::to_string))),
            Outgoing::Report => trace!(tid = %transaction.tid(), %code, "response to a REPORT"),
        }
    }

    /// An outgoing message failed with `code`; notifies the first failure only.
    fn fail_message(&self, session: Arc<Session>, message: MessageRef, code: ResponseCode, events: &mut Vec<Event>) {
        let first = {
            let mut message = message.lock();
            let first = message.result_code().is_none();
            message.reject(code);
            first
        };
        if self.cancel_locked(&mut self.state.lock(), &message) {
            self.notify.notify_one();
        }
        if first {
            info!(session = %session.uri(), %code, "message failed");
            events.push(Event::Aborted(session, message, AbortReason::ErrorResponse(code)));
        }
    }

    /// Aborts an outgoing message: queued chunks are dropped and a chunk already on
    /// the wire ends with `#`.
    ///
    /// Returns false when the message was no longer active.
    pub fn abort_message(&self, message: &MessageRef) -> Result<bool, MsrpError> {
        ensure!(message.lock().direction() == Direction::Outgoing, MsrpError::illegal_use("only outgoing messages are cancelled"));
        let cancelled = self.cancel_locked(&mut self.state.lock(), message);
        if cancelled {
            self.notify.notify_one();
        }
        Ok(cancelled)
    }

    fn cancel_locked(&self, state: &mut ManagerState, message: &MessageRef) -> bool {
        let message_id = {
            let mut message = message.lock();
            if !message.abort() {
                return false;
            }
            message.message_id().clone()
        };

        let mut dropped = Vec::new();
        state.queue.retain(|t| {
            let drop = *t.kind() == TransactionKind::Send && t.carries(message) && !t.has_started();
            if drop {
                dropped.push(t.tid().clone());
            }
            !drop
        });
        for tid in &dropped {
            state.in_flight.remove(tid);
        }
        for transaction in state.queue.iter_mut().filter(|t| *t.kind() == TransactionKind::Send && t.carries(message)) {
            if let Err(e) = transaction.abort() {
                warn!(tid = %transaction.tid(), cause = %e, "failed to abort chunk");
            }
        }
        debug!(%message_id, dropped = dropped.len(), "message cancelled");
        true
    }

    /// Drops an incoming message and tells the sender with a failure REPORT.
    pub(crate) fn abort_incoming(&self, session: &Arc<Session>, message: &MessageRef, code: ResponseCode) -> Result<(), MsrpError> {
        let (aborted, wants_report, message_id) = {
            let mut message = message.lock();
            let wants_report = message.failure_report() != FailureReport::No;
            (message.abort(), wants_report, message.message_id().clone())
        };
        if !aborted {
            return Ok(());
        }

        info!(session = %session.uri(), %message_id, %code, "abort incoming message");
        if wants_report {
            self.send_report(session, message, |tid| Transaction::failure_report(tid, Arc::clone(session), message, code))?;
        }
        Ok(())
    }

    /// Expires transactions whose response did not arrive within the configured
    /// timeout, as if answered with 408.
    pub fn check_response_timeouts(&self) {
        self.check_response_timeouts_at(Instant::now());
    }

    pub fn check_response_timeouts_at(&self, now: Instant) {
        let timeout = self.stack.config().response_timeout();
        let expired: Vec<(TransactionId, InFlight)> = {
            let mut state = self.state.lock();
            let tids: Vec<TransactionId> = state
                .in_flight
                .iter()
                .filter(|(_, entry)| entry.sent_at.is_some_and(|at| now.saturating_duration_since(at) >= timeout))
                .map(|(tid, _)| tid.clone())
                .collect();
            tids.into_iter().filter_map(|tid| state.in_flight.remove(&tid).map(|entry| (tid, entry))).collect()
        };

        let mut events = Vec::new();
        for (tid, entry) in expired {
            match (entry.kind, entry.expect, entry.message) {
                (Outgoing::Send, Expect::Response, Some(message)) => {
                    warn!(%tid, "no response in time");
                    self.fail_message(entry.session, message, ResponseCode::RequestTimeout, &mut events);
                }
                (Outgoing::Nickname, ..) => {
                    warn!(%tid, "no response to NICKNAME in time");
                    events.push(Event::NicknameResult(entry.session, ResponseCode::RequestTimeout, None));
                }
                _ => trace!(%tid, "no error response, assume success"),
            }
        }
        dispatch(events);
    }

    /// Waits until data is queued, the manager closes or `timeout` elapses.
    pub async fn wait_for_data(&self, timeout: Duration) -> bool {
        if self.is_closed() || self.has_data_to_send() {
            return true;
        }
        tokio::time::timeout(timeout, self.notify.notified()).await.is_ok()
    }

    /// Closes the manager; every bound session gets `connection_lost`.
    pub fn connection_lost(&self, cause: Option<String>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions: Vec<Arc<Session>> = {
            let mut state = self.state.lock();
            state.queue.clear();
            state.in_flight.clear();
            state.scanner = None;
            state.sessions.drain().map(|(_, session)| session).collect()
        };
        for session in &sessions {
            self.stack.deactivate(session.uri());
            session.unbind();
        }
        info!(sessions = sessions.len(), ?cause, "connection closed");
        self.notify.notify_one();
        dispatch(sessions.into_iter().map(|session| Event::ConnectionLost(session, cause.clone())).collect());
    }

    pub fn close(&self) {
        self.connection_lost(None);
    }

    #[cfg(test)]
    fn with_queue<R>(&self, f: impl FnOnce(&VecDeque<Transaction>) -> R) -> R {
        f(&self.state.lock().queue)
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager").field("closed", &self.is_closed()).finish_non_exhaustive()
    }
}

fn new_tid(state: &ManagerState) -> TransactionId {
    loop {
        let tid = TransactionId::generate();
        if !state.in_flight.contains_key(&tid) && state.queue.iter().all(|t| t.tid() != &tid) {
            return tid;
        }
    }
}

fn add_priority_locked(state: &mut ManagerState, transaction: Transaction) -> Result<(), MsrpError> {
    match state.queue.iter().position(Transaction::is_interruptible) {
        Some(0) if state.queue[0].has_started() => {
            let head = &mut state.queue[0];
            if head.body_remaining() > 0 {
                head.interrupt()?;
                debug!(tid = %head.tid(), priority = %transaction.tid(), "interrupt chunk for priority transaction");
            }
            state.queue.insert(1, transaction);
        }
        Some(at) => state.queue.insert(at, transaction),
        None => state.queue.push_back(transaction),
    }
    Ok(())
}

/// `(offset, len, last)` of the chunks covering `[start, end)`.
///
/// An empty range still gets one chunk; `last` is only set on the final chunk and
/// only when `ends_message`.
fn chunk_plan(start: u64, end: u64, chunk_size: Option<usize>, ends_message: bool) -> Vec<(u64, u64, bool)> {
    if start >= end {
        return vec![(start, 0, ends_message)];
    }
    let step = chunk_size.map_or(end - start, |size| size as u64).max(1);
    let mut plan = Vec::new();
    let mut offset = start;
    while offset < end {
        let len = step.min(end - offset);
        plan.push((offset, len, ends_message && offset + len == end));
        offset += len;
    }
    plan
}

fn is_aborted_incoming(message: &MessageRef) -> bool {
    let message = message.lock();
    message.direction() == Direction::Incoming && message.state() == MessageState::Aborted
}

fn dispatch(events: Vec<Event>) {
    for event in events {
        match event {
            Event::ReceivedMessage(session, message) => session.listener().received_message(&session, message),
            Event::ReceivedReport(session, report) => session.listener().received_report(&session, &report),
            Event::Aborted(session, message, reason) => session.listener().aborted_message(&session, message, reason),
            Event::SendStatus(session, message, sent_bytes) => session.listener().update_send_status(&session, message, sent_bytes),
            Event::NicknameResult(session, code, comment) => session.listener().nickname_result(&session, code, comment),
            Event::ConnectionLost(session, cause) => session.listener().connection_lost(&session, cause),
        }
    }
}
