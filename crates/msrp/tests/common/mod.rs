#![allow(dead_code, reason = "every test binary uses a different part of the helpers")]

use std::sync::Arc;

use bytes::BytesMut;
use micro_msrp::codec::TransactionDecoder;
use micro_msrp::config::StackConfig;
use micro_msrp::connection::TransactionReceiver;
use micro_msrp::manager::{AbortReason, AcceptHook, MsrpStack, ReceivedReport, Session, SessionListener, TransactionManager};
use micro_msrp::protocol::{MessageRef, MsrpUri, ResponseCode, parse_path};
use parking_lot::Mutex;
use tokio_util::codec::Decoder;

pub const ALICE: &str = "msrp://alicepc.example.com:7777/iau39soe2843z;tcp";
pub const BOB: &str = "msrp://bob.example.com:8888/9di4eae923wzd;tcp";

pub enum Recorded {
    Message(MessageRef),
    Report(ReceivedReport),
    Aborted(MessageRef, AbortReason),
    Progress(u64),
    Nickname(String),
    NicknameResult(ResponseCode),
    ConnectionLost(Option<String>),
}

/// Listener keeping every event for later assertions.
pub struct Recorder {
    events: Mutex<Vec<Recorded>>,
    nickname_answer: ResponseCode,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Self::answering(ResponseCode::Ok)
    }

    pub fn answering(nickname_answer: ResponseCode) -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Vec::new()), nickname_answer })
    }

    pub fn messages(&self) -> Vec<MessageRef> {
        self.collect(|event| match event {
            Recorded::Message(message) => Some(Arc::clone(message)),
            _ => None,
        })
    }

    pub fn reports(&self) -> Vec<ReceivedReport> {
        self.collect(|event| match event {
            Recorded::Report(report) => Some(report.clone()),
            _ => None,
        })
    }

    pub fn aborts(&self) -> Vec<AbortReason> {
        self.collect(|event| match event {
            Recorded::Aborted(_, reason) => Some(*reason),
            _ => None,
        })
    }

    pub fn progress(&self) -> Vec<u64> {
        self.collect(|event| match event {
            Recorded::Progress(sent) => Some(*sent),
            _ => None,
        })
    }

    pub fn nicknames(&self) -> Vec<String> {
        self.collect(|event| match event {
            Recorded::Nickname(nickname) => Some(nickname.clone()),
            _ => None,
        })
    }

    pub fn nickname_results(&self) -> Vec<ResponseCode> {
        self.collect(|event| match event {
            Recorded::NicknameResult(code) => Some(*code),
            _ => None,
        })
    }

    pub fn connection_losses(&self) -> usize {
        self.events.lock().iter().filter(|event| matches!(event, Recorded::ConnectionLost(_))).count()
    }

    fn collect<T>(&self, f: impl Fn(&Recorded) -> Option<T>) -> Vec<T> {
        self.events.lock().iter().filter_map(f).collect()
    }

    fn push(&self, event: Recorded) {
        self.events.lock().push(event);
    }
}

impl SessionListener for Recorder {
    fn received_message(&self, _session: &Session, message: MessageRef) {
        self.push(Recorded::Message(message));
    }

    fn received_report(&self, _session: &Session, report: &ReceivedReport) {
        self.push(Recorded::Report(report.clone()));
    }

    fn aborted_message(&self, _session: &Session, message: MessageRef, reason: AbortReason) {
        self.push(Recorded::Aborted(message, reason));
    }

    fn update_send_status(&self, _session: &Session, _message: MessageRef, sent_bytes: u64) {
        self.push(Recorded::Progress(sent_bytes));
    }

    fn received_nickname(&self, _session: &Session, nickname: &str) -> ResponseCode {
        self.push(Recorded::Nickname(nickname.to_string()));
        self.nickname_answer
    }

    fn nickname_result(&self, _session: &Session, code: ResponseCode, _comment: Option<String>) {
        self.push(Recorded::NicknameResult(code));
    }

    fn connection_lost(&self, _session: &Session, cause: Option<String>) {
        self.push(Recorded::ConnectionLost(cause));
    }
}

/// One side of a connection, without sockets: bytes are moved by [`transfer`].
pub struct Endpoint {
    pub session: Arc<Session>,
    pub manager: Arc<TransactionManager>,
    pub recorder: Arc<Recorder>,
    decoder: TransactionDecoder,
    receiver: TransactionReceiver,
    inbox: BytesMut,
}

impl Endpoint {
    pub fn new(local: &str, remote: &str, config: StackConfig) -> Self {
        Self::build(local, remote, config, Recorder::new(), None)
    }

    pub fn build(local: &str, remote: &str, config: StackConfig, recorder: Arc<Recorder>, accept_hook: Option<Arc<dyn AcceptHook>>) -> Self {
        let stack = MsrpStack::new(config);
        let mut builder = Session::builder(&stack, MsrpUri::parse(local).unwrap())
            .to_path(parse_path(remote).unwrap())
            .listener(Arc::clone(&recorder) as Arc<dyn SessionListener>);
        if let Some(accept_hook) = accept_hook {
            builder = builder.accept_hook(accept_hook);
        }
        let session = builder.build().unwrap();
        let manager = TransactionManager::new(Arc::clone(&stack));
        manager.bind_session(&session).unwrap();
        let receiver = TransactionReceiver::new(Arc::clone(&manager));
        Self { session, manager, recorder, decoder: TransactionDecoder::new(), receiver, inbox: BytesMut::new() }
    }

    /// Takes one buffer of at most `capacity` bytes from the send queue.
    pub fn take_output(&self, capacity: usize) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.manager.get_data_to_send(&mut buf, capacity).unwrap();
        buf.to_vec()
    }

    /// Feeds received bytes in slices of `slice` bytes.
    pub fn feed(&mut self, bytes: &[u8], slice: usize) {
        for piece in bytes.chunks(slice.max(1)) {
            self.inbox.extend_from_slice(piece);
            while let Some(frame) = self.decoder.decode(&mut self.inbox).unwrap() {
                self.receiver.on_frame(frame).unwrap();
            }
        }
    }
}

/// Moves everything `from` has queued to `to`; returns the number of bytes moved.
pub fn transfer(from: &Endpoint, to: &mut Endpoint, capacity: usize, slice: usize) -> usize {
    let mut moved = 0;
    loop {
        let output = from.take_output(capacity);
        if output.is_empty() && !from.manager.has_data_to_send() {
            return moved;
        }
        moved += output.len();
        to.feed(&output, slice);
    }
}

/// Exchanges data both ways until neither side has anything left to send.
pub fn settle(a: &mut Endpoint, b: &mut Endpoint, capacity: usize, slice: usize) {
    loop {
        let moved = transfer(a, b, capacity, slice) + transfer(b, a, capacity, slice);
        if moved == 0 {
            return;
        }
    }
}

pub fn content(len: usize) -> Vec<u8> {
    let mut content: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
    if len > 64 {
        content[32..41].copy_from_slice(b"\r\n-------");
    }
    content
}
