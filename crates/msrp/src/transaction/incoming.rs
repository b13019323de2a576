use bytes::BytesMut;
use tracing::{trace, warn};

use crate::protocol::{ContinuationFlag, MessageRef, MessageState, MsrpError, ParseError, ResponseCode, TransactionHeader};
use crate::transaction::{Consumer, Flow, Transaction, TransactionKind};
use crate::utils::ensure;

/// Body bytes kept for requests other than SEND.
pub const MAX_NON_SEND_BODY: usize = 10240;

impl Transaction {
    fn consumer(&self) -> Option<&Consumer> {
        match &self.flow {
            Flow::Incoming(consumer) => Some(consumer),
            Flow::Outgoing(_) => None,
        }
    }

    /// Installs the recognized header of an incoming transaction.
    pub fn set_header(&mut self, header: TransactionHeader) {
        self.header = header;
    }

    /// The header block ended; `content_stuff` tells whether a body follows.
    pub fn header_complete(&mut self, content_stuff: bool) -> Result<(), MsrpError> {
        let Flow::Incoming(consumer) = &mut self.flow else {
            return Err(MsrpError::illegal_use("outgoing transactions have no incoming header"));
        };
        ensure!(!consumer.header_complete, MsrpError::illegal_use(format!("header of {} already complete", self.tid)));
        consumer.header_complete = true;
        consumer.content_stuff = content_stuff;
        Ok(())
    }

    pub fn has_content_stuff(&self) -> bool {
        self.consumer().is_some_and(|c| c.content_stuff)
    }

    /// Body bytes received so far.
    pub fn received_body(&self) -> u64 {
        self.consumer().map_or(0, |c| c.received)
    }

    /// Body of a request other than SEND.
    pub fn scratch_body(&self) -> &[u8] {
        self.consumer().map(|c| &c.scratch[..]).unwrap_or_default()
    }

    /// Accepts body bytes of an incoming transaction.
    ///
    /// Failures while storing the body do not surface as errors; they turn the
    /// transaction into an invalid one answered with 400.
    pub fn parse_body(&mut self, data: &[u8]) -> Result<(), MsrpError> {
        ensure!(!self.complete, MsrpError::illegal_use(format!("transaction {} already complete", self.tid)));
        let Self { flow, kind, message, header, valid, response_code, tid, .. } = self;
        let Flow::Incoming(consumer) = flow else {
            return Err(MsrpError::illegal_use("outgoing transactions do not parse a body"));
        };
        if !*valid {
            trace!(%tid, len = data.len(), "discard body of invalid transaction");
            return Ok(());
        }

        let result = match (&*kind, message.as_ref()) {
            (TransactionKind::Send, Some(message)) => {
                consumer.pending.extend_from_slice(data);
                let granularity = consumer.report_mechanism.trigger_granularity().max(1);
                let mut result = Ok(());
                while result.is_ok() && consumer.pending.len() >= granularity {
                    let block = consumer.pending.split_to(granularity);
                    result = write_block(consumer, message, header, block);
                }
                result
            }
            _ if consumer.scratch.len() + data.len() > MAX_NON_SEND_BODY => {
                Err(ParseError::invalid_header(format!("body exceeds {MAX_NON_SEND_BODY} bytes")).into())
            }
            _ => {
                consumer.scratch.extend_from_slice(data);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(%tid, cause = %e, "failed to store body, reject transaction");
            *valid = false;
            *response_code = Some(ResponseCode::BadRequest);
        }
        Ok(())
    }

    /// The end-line with `flag` was received.
    ///
    /// Flushes buffered body bytes and records `$` on the message counter. After this
    /// call the transaction is complete and accepts no more input.
    pub fn signalize_end(&mut self, flag: ContinuationFlag) -> Result<(), MsrpError> {
        ensure!(!self.complete, MsrpError::illegal_use(format!("transaction {} already complete", self.tid)));
        let Self { flow, kind, message, header, valid, response_code, tid, .. } = self;
        let Flow::Incoming(consumer) = flow else {
            return Err(MsrpError::illegal_use("end-line of an outgoing transaction"));
        };

        if *valid && *kind == TransactionKind::Send {
            if let Some(message) = message.as_ref() {
                let block = consumer.pending.split();
                let result = if block.is_empty() { Ok(()) } else { write_block(consumer, message, header, block) };
                match result {
                    Ok(()) if flag == ContinuationFlag::End => message.lock().counter_mut().received_end_of_message(),
                    Ok(()) => {}
                    Err(e) => {
                        warn!(%tid, cause = %e, "failed to store body, reject transaction");
                        *valid = false;
                        *response_code = Some(ResponseCode::BadRequest);
                    }
                }
            }
        }

        if flag == ContinuationFlag::Abort {
            self.aborted = true;
        }
        self.flag = flag;
        self.complete = true;
        Ok(())
    }

    /// Flag of the received end-line.
    pub fn received_flag(&self) -> Option<ContinuationFlag> {
        (self.complete && self.consumer().is_some()).then_some(self.flag)
    }
}

fn write_block(consumer: &mut Consumer, message: &MessageRef, header: &TransactionHeader, block: BytesMut) -> Result<(), MsrpError> {
    let range = header.byte_range_or_default();
    let len = block.len() as u64;
    let offset = range.offset().checked_add(consumer.received);
    let block_end = offset.and_then(|offset| offset.checked_add(len));
    let (Some(offset), Some(block_end)) = (offset, block_end) else {
        return Err(ParseError::invalid_header(format!("body overflows Byte-Range {range}")).into());
    };
    if let Some(end) = range.end {
        ensure!(block_end <= end, ParseError::invalid_header(format!("body exceeds Byte-Range {range}")).into());
    }

    consumer.received += len;
    let mut message = message.lock();
    if message.state() != MessageState::Active {
        trace!(message_id = %message.message_id(), state = ?message.state(), "drop body of inactive message");
        return Ok(());
    }
    message.write_body(offset, &block)?;
    consumer.report_mechanism.count_received_body_block(&mut message, offset, len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::StartLine;
    use crate::manager::DefaultReportMechanism;
    use crate::protocol::{ByteRange, MemoryContainer, Message, MessageId, MessageSize};

    fn incoming_send(range: ByteRange, granularity: usize) -> (Transaction, MessageRef) {
        let start_line = StartLine::parse(b"MSRP a786hjs2 SEND").unwrap();
        let mut transaction = Transaction::incoming(start_line, Arc::new(DefaultReportMechanism::new(granularity)));
        let mut header = TransactionHeader::default();
        header.message_id = Some(MessageId::parse("87652491").unwrap());
        header.byte_range = Some(range);
        transaction.set_header(header);
        transaction.header_complete(true).unwrap();

        let mut message = Message::incoming(MessageId::parse("87652491").unwrap(), None, range.total.into());
        message.set_data_container(Box::new(MemoryContainer::with_size(range.total.unwrap_or(64) as usize)));
        let message = message.into_ref();
        transaction.set_message(message.clone());
        (transaction, message)
    }

    #[test]
    fn body_lands_at_byte_range_offset() {
        let (mut transaction, message) = incoming_send(ByteRange::new(6, Some(10), Some(10)), 2);
        transaction.parse_body(b"wor").unwrap();
        assert_eq!(message.lock().counter().count(), 2, "only whole blocks are counted before the end");
        transaction.parse_body(b"ld").unwrap();
        transaction.signalize_end(ContinuationFlag::End).unwrap();

        assert!(transaction.is_valid());
        assert_eq!(transaction.received_body(), 5);
        assert_eq!(transaction.received_flag(), Some(ContinuationFlag::End));
        let mut message = message.lock();
        assert_eq!(message.counter().count(), 5);
        assert!(message.counter().is_end_of_message_received());
        assert!(!message.is_complete(), "first five bytes are missing");
        assert_eq!(&message.data_container_mut().unwrap().get_at(5, 5).unwrap()[..], b"world");
        assert_eq!(message.size(), MessageSize::Known(10));
    }

    #[test]
    fn body_beyond_range_rejects_transaction() {
        let (mut transaction, _message) = incoming_send(ByteRange::new(1, Some(3), Some(10)), 1024);
        transaction.parse_body(b"abcdef").unwrap();
        transaction.signalize_end(ContinuationFlag::Interrupt).unwrap();
        assert!(!transaction.is_valid());
        assert_eq!(transaction.response_code(), Some(ResponseCode::BadRequest));
    }

    #[test]
    fn range_start_at_u64_max_rejects_transaction() {
        let (mut transaction, message) = incoming_send(ByteRange::new(u64::MAX, None, Some(10)), 4);
        transaction.parse_body(b"abcdef").unwrap();
        transaction.signalize_end(ContinuationFlag::End).unwrap();

        assert!(!transaction.is_valid());
        assert_eq!(transaction.response_code(), Some(ResponseCode::BadRequest));
        assert_eq!(message.lock().counter().count(), 0);
    }

    #[test]
    fn complete_transaction_rejects_input() {
        let (mut transaction, _message) = incoming_send(ByteRange::new(1, Some(3), Some(3)), 1024);
        transaction.parse_body(b"abc").unwrap();
        transaction.signalize_end(ContinuationFlag::End).unwrap();
        assert!(matches!(transaction.parse_body(b"x"), Err(MsrpError::IllegalUse { .. })));
        assert!(matches!(transaction.signalize_end(ContinuationFlag::End), Err(MsrpError::IllegalUse { .. })));
    }

    #[test]
    fn abort_flag_is_recorded() {
        let (mut transaction, message) = incoming_send(ByteRange::new(1, None, None), 4);
        transaction.parse_body(b"partial").unwrap();
        transaction.signalize_end(ContinuationFlag::Abort).unwrap();
        assert!(transaction.is_aborted());
        assert!(!message.lock().counter().is_end_of_message_received());
        assert_eq!(message.lock().counter().count(), 7);
    }

    #[test]
    fn non_send_body_is_bounded() {
        let start_line = StartLine::parse(b"MSRP a786hjs2 REPORT").unwrap();
        let mut transaction = Transaction::incoming(start_line, Arc::new(DefaultReportMechanism::default()));
        transaction.header_complete(true).unwrap();
        transaction.parse_body(b"note").unwrap();
        assert_eq!(transaction.scratch_body(), b"note");
        transaction.parse_body(&vec![b'x'; MAX_NON_SEND_BODY]).unwrap();
        assert!(!transaction.is_valid());
    }
}
