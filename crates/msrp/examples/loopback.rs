//! Alice sends a message and a file to Bob over a loopback TCP connection.
//!
//! ```shell
//! cargo run -p micro-msrp --example loopback -- Cargo.toml
//! ```

use std::sync::Arc;

use micro_msrp::config::StackConfig;
use micro_msrp::connection::MsrpConnection;
use micro_msrp::manager::{AbortReason, DefaultSessionListener, MsrpStack, ReceivedReport, Session, SessionListener, TransactionManager};
use micro_msrp::protocol::{Message, MessageRef, MsrpUri, ResponseCode, parse_path};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Prints received messages and forwards them to `main`.
struct Inbox {
    sender: mpsc::UnboundedSender<MessageRef>,
}

impl SessionListener for Inbox {
    fn received_message(&self, session: &Session, message: MessageRef) {
        {
            let mut guard = message.lock();
            match guard.content() {
                Ok(content) if content.len() <= 80 => info!(session = %session.uri(), content = %String::from_utf8_lossy(&content), "receive message"),
                Ok(content) => info!(session = %session.uri(), len = content.len(), "receive large message"),
                Err(e) => warn!(cause = %e, "can't read message"),
            }
        }
        let _ = self.sender.send(message);
    }

    fn received_report(&self, session: &Session, report: &ReceivedReport) {
        DefaultSessionListener.received_report(session, report);
    }

    fn aborted_message(&self, session: &Session, message: MessageRef, reason: AbortReason) {
        DefaultSessionListener.aborted_message(session, message, reason);
    }

    fn update_send_status(&self, session: &Session, message: MessageRef, sent_bytes: u64) {
        DefaultSessionListener.update_send_status(session, message, sent_bytes);
    }

    fn received_nickname(&self, session: &Session, nickname: &str) -> ResponseCode {
        DefaultSessionListener.received_nickname(session, nickname)
    }

    fn nickname_result(&self, session: &Session, code: ResponseCode, comment: Option<String>) {
        DefaultSessionListener.nickname_result(session, code, comment);
    }

    fn connection_lost(&self, session: &Session, cause: Option<String>) {
        DefaultSessionListener.connection_lost(session, cause);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let tcp_listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = tcp_listener.local_addr()?;
    info!(%addr, "bob is listening");

    let alice_uri = MsrpUri::parse("msrp://127.0.0.1:2855/iau39soe2843z;tcp")?;
    let bob_uri = MsrpUri::parse(&format!("msrp://{addr}/9di4eae923wzd;tcp"))?;

    // bob waits for alice to connect, the session binds on her first request
    let bob_stack = MsrpStack::new(StackConfig::default());
    let (sender, mut inbox) = mpsc::unbounded_channel();
    let bob = Session::builder(&bob_stack, bob_uri.clone())
        .to_path(vec![alice_uri.clone()])
        .listener(Arc::new(Inbox { sender }))
        .build()?;
    bob_stack.expect_session(Arc::clone(&bob));

    tokio::spawn(async move {
        let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                error!(cause = %e, "failed to accept");
                return;
            }
        };
        info!(%remote_addr, "accept connection");
        let (reader, writer) = tcp_stream.into_split();
        let manager = TransactionManager::new(bob_stack);
        if let Err(e) = MsrpConnection::new(reader, writer, manager).process().await {
            error!(cause = %e, "bob's connection failed");
        }
    });

    let alice_stack = MsrpStack::new(StackConfig::builder().chunk_size(1024).build());
    let alice = Session::builder(&alice_stack, alice_uri).to_path(parse_path(bob_uri.as_str())?).build()?;
    alice.send_message(mime::TEXT_PLAIN, b"Hi, I'm Alice!")?;

    let mut expected = 1;
    if let Some(path) = std::env::args().nth(1) {
        let mut message = Message::outgoing(mime::APPLICATION_OCTET_STREAM, Box::new(micro_msrp::protocol::FileContainer::open(path)?));
        message.set_success_report(true);
        alice.send(message)?;
        expected += 1;
    }

    let (reader, writer) = TcpStream::connect(addr).await?.into_split();
    let manager = TransactionManager::new(Arc::clone(&alice_stack));
    manager.bind_session(&alice)?;
    let alice_task = tokio::spawn(MsrpConnection::new(reader, writer, Arc::clone(&manager)).process());

    for _ in 0..expected {
        if inbox.recv().await.is_none() {
            break;
        }
    }

    manager.close();
    alice_task.await??;
    info!("finished, connection shutdown");
    Ok(())
}
