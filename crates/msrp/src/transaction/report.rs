use std::sync::Arc;

use crate::manager::Session;
use crate::protocol::{
    ByteRange, FailureReport, MessageId, MessageRef, MsrpError, MsrpUri, ResponseCode, StatusHeader, TransactionHeader, TransactionId,
};
use crate::transaction::{Transaction, TransactionKind};
use crate::utils::ensure;

impl Transaction {
    /// The response to an incoming request.
    ///
    /// REPORT requests and responses are never answered.
    pub fn response_to(request: &Transaction, code: ResponseCode, comment: Option<String>) -> Result<Self, MsrpError> {
        ensure!(
            matches!(request.kind, TransactionKind::Send | TransactionKind::Nickname | TransactionKind::Unsupported(_)),
            MsrpError::illegal_use(format!("{:?} transactions are not answered", request.kind))
        );
        let header = &request.header;
        ensure!(
            !header.to_path.is_empty() && !header.from_path.is_empty(),
            MsrpError::illegal_use(format!("no path to answer transaction {}", request.tid))
        );

        let mut response_header = TransactionHeader::new(header.from_path.clone(), header.to_path.clone());
        response_header.message_id = header.message_id.clone();
        let kind = TransactionKind::Response { code: code.code(), comment: comment.or_else(|| Some(code.reason().to_string())) };
        let mut response = Self::outgoing(request.tid.clone(), kind, response_header, false, 0, 0)?;
        response.session = request.session.clone();
        Ok(response)
    }

    /// A REPORT telling the sender that `message` arrived completely.
    pub fn success_report(tid: TransactionId, session: Arc<Session>, message: &MessageRef) -> Result<Self, MsrpError> {
        let (mut header, size) = {
            let message = message.lock();
            ensure!(
                message.success_report(),
                MsrpError::illegal_use(format!("message {} did not ask for a success report", message.message_id()))
            );
            let size = message.size().known().unwrap_or_else(|| message.counter().count());
            (report_header(&session, message.last_send_transaction().map(|t| t.from_path.as_slice()), message.message_id().clone()), size)
        };

        header.byte_range = Some(ByteRange::new(1, Some(size), Some(size)));
        header.status = Some(StatusHeader::new(ResponseCode::Ok));
        Self::report(tid, session, message, header)
    }

    /// A REPORT telling the sender that `message` failed with `code`.
    ///
    /// The Byte-Range is the one of the last SEND received for the message.
    pub fn failure_report(tid: TransactionId, session: Arc<Session>, message: &MessageRef, code: ResponseCode) -> Result<Self, MsrpError> {
        let mut header = {
            let message = message.lock();
            ensure!(
                message.failure_report() != FailureReport::No,
                MsrpError::illegal_use(format!("message {} does not accept failure reports", message.message_id()))
            );
            let last = message.last_send_transaction();
            let mut header = report_header(&session, last.map(|t| t.from_path.as_slice()), message.message_id().clone());
            header.byte_range = Some(last.map(|t| t.byte_range).unwrap_or_default());
            header
        };

        header.status = Some(StatusHeader::new(code));
        Self::report(tid, session, message, header)
    }

    fn report(tid: TransactionId, session: Arc<Session>, message: &MessageRef, header: TransactionHeader) -> Result<Self, MsrpError> {
        let mut report = Self::outgoing(tid, TransactionKind::Report, header, false, 0, 0)?;
        report.message = Some(message.clone());
        report.session = Some(session);
        Ok(report)
    }
}

/// Reports travel back along the From-Path of the SEND they are about.
fn report_header(session: &Session, sender_path: Option<&[MsrpUri]>, message_id: MessageId) -> TransactionHeader {
    let to_path = sender_path.map(<[MsrpUri]>::to_vec).unwrap_or_else(|| session.to_path().to_vec());
    let mut header = TransactionHeader::new(to_path, vec![session.uri().clone()]);
    header.message_id = Some(message_id);
    header
}
