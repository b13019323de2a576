use std::sync::Arc;

use tracing::{trace, warn};

use crate::codec::Frame;
use crate::manager::TransactionManager;
use crate::protocol::MsrpError;
use crate::transaction::Transaction;

/// Feeds decoded frames of one connection into incoming transactions.
///
/// At most one incoming transaction is open at a time: the decoder only starts the
/// next one after the end-line of the previous.
#[derive(Debug)]
pub struct TransactionReceiver {
    manager: Arc<TransactionManager>,
    current: Option<Transaction>,
}

impl TransactionReceiver {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self { manager, current: None }
    }

    /// Whether a transaction was started but its end-line not yet seen.
    pub fn is_receiving(&self) -> bool {
        self.current.is_some()
    }

    pub fn on_frame(&mut self, frame: Frame) -> Result<(), MsrpError> {
        match frame {
            Frame::Start(start_line) => {
                if let Some(dropped) = self.current.take() {
                    warn!(tid = %dropped.tid(), "transaction restarted before its end-line");
                }
                let report_mechanism = Arc::clone(self.manager.stack().report_mechanism());
                self.current = Some(Transaction::incoming(start_line, report_mechanism));
            }
            Frame::Headers { block, content_stuff } => {
                let Some(transaction) = self.current.as_mut() else {
                    return Err(MsrpError::internal("header block without start line"));
                };
                self.manager.process_header(transaction, &block, content_stuff);
            }
            Frame::Body(body) => {
                let Some(transaction) = self.current.as_mut() else {
                    return Err(MsrpError::internal("body without start line"));
                };
                trace!(tid = %transaction.tid(), len = body.len(), "received body bytes");
                transaction.parse_body(&body)?;
            }
            Frame::End(flag) => {
                let Some(mut transaction) = self.current.take() else {
                    return Err(MsrpError::internal("end-line without start line"));
                };
                transaction.signalize_end(flag)?;
                self.manager.transaction_complete(transaction);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio_util::codec::Decoder;

    use super::*;
    use crate::codec::TransactionDecoder;
    use crate::config::StackConfig;
    use crate::manager::{MockSessionListener, MsrpStack, Session};
    use crate::protocol::{MessageState, MsrpUri, parse_path};

    const ALICE: &str = "msrp://alicepc.example.com:7777/iau39soe2843z;tcp";
    const BOB: &str = "msrp://bob.example.com:8888/9di4eae923wzd;tcp";

    fn crlf(text: &str) -> String {
        text.replace('\n', "\r\n")
    }

    fn receive(receiver: &mut TransactionReceiver, wire: &[u8], slice: usize) {
        let mut decoder = TransactionDecoder::new();
        let mut src = BytesMut::new();
        for piece in wire.chunks(slice) {
            src.extend_from_slice(piece);
            while let Some(frame) = decoder.decode(&mut src).unwrap() {
                receiver.on_frame(frame).unwrap();
            }
        }
        assert!(src.is_empty());
    }

    fn drain(manager: &TransactionManager) -> String {
        let mut out = BytesMut::new();
        while manager.get_data_to_send(&mut out, 1024).unwrap() > 0 {}
        String::from_utf8(out.to_vec()).unwrap()
    }

    #[test]
    fn chunked_send_is_delivered_once() {
        let mut listener = MockSessionListener::new();
        listener
            .expect_received_message()
            .withf(|_, message| {
                let mut message = message.lock();
                message.state() == MessageState::Complete && message.content().is_ok_and(|content| content == b"Hello world!"[..])
            })
            .times(1)
            .return_const(());

        let stack = MsrpStack::new(StackConfig::default());
        let session = Session::builder(&stack, MsrpUri::parse(BOB).unwrap())
            .to_path(parse_path(ALICE).unwrap())
            .listener(Arc::new(listener))
            .build()
            .unwrap();
        let manager = TransactionManager::new(Arc::clone(&stack));
        manager.bind_session(&session).unwrap();

        let wire = crlf(&format!(
            "MSRP d93kswow SEND\nTo-Path: {BOB}\nFrom-Path: {ALICE}\nMessage-ID: 12339sdqwer\nByte-Range: 1-6/12\nContent-Type: text/plain\n\nHello \n-------d93kswow+\n\
             MSRP op2nc9a SEND\nTo-Path: {BOB}\nFrom-Path: {ALICE}\nMessage-ID: 12339sdqwer\nByte-Range: 7-12/12\nContent-Type: text/plain\n\nworld!\n-------op2nc9a$\n"
        ));

        let mut receiver = TransactionReceiver::new(Arc::clone(&manager));
        receive(&mut receiver, wire.as_bytes(), 7);
        assert!(!receiver.is_receiving());

        let responses = drain(&manager);
        assert!(responses.starts_with(&crlf(&format!("MSRP d93kswow 200 OK\nTo-Path: {ALICE}\nFrom-Path: {BOB}\n-------d93kswow$\n"))));
        assert!(responses.ends_with(&crlf(&format!("MSRP op2nc9a 200 OK\nTo-Path: {ALICE}\nFrom-Path: {BOB}\n-------op2nc9a$\n"))));
    }

    #[test]
    fn frames_out_of_order_are_rejected() {
        let stack = MsrpStack::new(StackConfig::default());
        let manager = TransactionManager::new(stack);
        let mut receiver = TransactionReceiver::new(manager);
        assert!(matches!(receiver.on_frame(Frame::Body(bytes::Bytes::from_static(b"x"))), Err(MsrpError::Internal { .. })));
        assert!(matches!(
            receiver.on_frame(Frame::End(crate::protocol::ContinuationFlag::End)),
            Err(MsrpError::Internal { .. })
        ));
    }
}
