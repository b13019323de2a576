//! Start line and header serialization for outgoing transactions.
//!
//! The end-line is not part of the head; the transaction produces it on its own once
//! the body is done, since the continuation flag is only known at that point.

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::protocol::{FailureReport, Method, MsrpError, MsrpUri, ResponseCode, TransactionHeader, TransactionId, format_path};

const INIT_HEAD_SIZE: usize = 512;

/// Everything rendered before the body of a transaction.
#[derive(Debug)]
pub enum Head<'a> {
    Request {
        tid: &'a TransactionId,
        method: &'a Method,
        header: &'a TransactionHeader,
        /// Write Content-Type and the blank line opening the body.
        content_stuff: bool,
    },
    Response {
        tid: &'a TransactionId,
        code: ResponseCode,
        comment: Option<&'a str>,
        to_path: &'a [MsrpUri],
        from_path: &'a [MsrpUri],
    },
}

#[derive(Debug, Copy, Clone, Default)]
pub struct HeaderEncoder;

impl Encoder<Head<'_>> for HeaderEncoder {
    type Error = MsrpError;

    fn encode(&mut self, item: Head<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(INIT_HEAD_SIZE);
        match item {
            Head::Request { tid, method, header, content_stuff } => encode_request(tid, method, header, content_stuff, dst)?,
            Head::Response { tid, code, comment, to_path, from_path } => {
                write!(FastWrite(dst), "MSRP {tid} {:03}", code.code())?;
                if let Some(comment) = comment {
                    write!(FastWrite(dst), " {comment}")?;
                }
                dst.put_slice(b"\r\n");
                write_paths(to_path, from_path, dst)?;
            }
        }
        Ok(())
    }
}

fn encode_request(tid: &TransactionId, method: &Method, header: &TransactionHeader, content_stuff: bool, dst: &mut BytesMut) -> io::Result<()> {
    write!(FastWrite(dst), "MSRP {tid} {}\r\n", method.as_str())?;
    write_paths(&header.to_path, &header.from_path, dst)?;

    if let Some(message_id) = &header.message_id {
        write!(FastWrite(dst), "Message-ID: {message_id}\r\n")?;
    }
    if header.success_report {
        dst.put_slice(b"Success-Report: yes\r\n");
    }
    if header.failure_report != FailureReport::Yes && *method == Method::Send {
        write!(FastWrite(dst), "Failure-Report: {}\r\n", header.failure_report.as_str())?;
    }
    if let Some(byte_range) = &header.byte_range {
        write!(FastWrite(dst), "Byte-Range: {byte_range}\r\n")?;
    }
    if let Some(status) = &header.status {
        write!(FastWrite(dst), "Status: {status}\r\n")?;
    }
    if let Some(nickname) = &header.nickname {
        write!(FastWrite(dst), "Use-Nickname: \"{nickname}\"\r\n")?;
    }
    if content_stuff {
        let content_type = header.content_type.as_ref().unwrap_or(&mime::APPLICATION_OCTET_STREAM);
        write!(FastWrite(dst), "Content-Type: {content_type}\r\n\r\n")?;
    }
    Ok(())
}

fn write_paths(to_path: &[MsrpUri], from_path: &[MsrpUri], dst: &mut BytesMut) -> io::Result<()> {
    write!(FastWrite(dst), "To-Path: {}\r\nFrom-Path: {}\r\n", format_path(to_path), format_path(from_path))
}

/// Writer appending to a `BytesMut` without going through an intermediate buffer.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ByteRange, MessageId, StatusHeader, parse_path};
    use indoc::indoc;

    fn header() -> TransactionHeader {
        TransactionHeader::new(
            parse_path("msrp://bob.example.com:8888/9di4eae923wzd;tcp").unwrap(),
            parse_path("msrp://alicepc.example.com:7777/iau39soe2843z;tcp").unwrap(),
        )
    }

    fn encode(item: Head<'_>) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode(item, &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap().replace("\r\n", "\n")
    }

    #[test]
    fn encode_send_head() {
        let tid = TransactionId::parse("a786hjs2").unwrap();
        let mut header = header();
        header.message_id = Some(MessageId::parse("87652491").unwrap());
        header.byte_range = Some(ByteRange::new(1, Some(25), Some(25)));
        header.content_type = Some(mime::TEXT_PLAIN);
        header.failure_report = FailureReport::Partial;

        let head = encode(Head::Request { tid: &tid, method: &Method::Send, header: &header, content_stuff: true });
        assert_eq!(
            head,
            indoc! {"
                MSRP a786hjs2 SEND
                To-Path: msrp://bob.example.com:8888/9di4eae923wzd;tcp
                From-Path: msrp://alicepc.example.com:7777/iau39soe2843z;tcp
                Message-ID: 87652491
                Failure-Report: partial
                Byte-Range: 1-25/25
                Content-Type: text/plain

            "}
        );
    }

    #[test]
    fn encode_report_head_without_body() {
        let tid = TransactionId::parse("dkei38sd").unwrap();
        let mut header = header();
        header.message_id = Some(MessageId::parse("12339sdqwer").unwrap());
        header.byte_range = Some(ByteRange::new(1, Some(106), Some(106)));
        header.status = Some(StatusHeader::new(ResponseCode::Ok));

        let head = encode(Head::Request { tid: &tid, method: &Method::Report, header: &header, content_stuff: false });
        assert!(head.ends_with("Byte-Range: 1-106/106\nStatus: 000 200 OK\n"));
        assert!(!head.contains("Content-Type"));
    }

    #[test]
    fn encode_response_head() {
        let tid = TransactionId::parse("a786hjs2").unwrap();
        let header = header();
        let head = encode(Head::Response {
            tid: &tid,
            code: ResponseCode::Ok,
            comment: Some("OK"),
            to_path: &header.from_path,
            from_path: &header.to_path,
        });
        assert_eq!(
            head,
            indoc! {"
                MSRP a786hjs2 200 OK
                To-Path: msrp://alicepc.example.com:7777/iau39soe2843z;tcp
                From-Path: msrp://bob.example.com:8888/9di4eae923wzd;tcp
            "}
        );
    }
}
