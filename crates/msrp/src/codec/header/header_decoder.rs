//! Header recognition for one transaction
//!
//! The transaction decoder hands over the raw header block, this module turns it into a
//! [`TransactionHeader`]. Recognition runs in one pass over the block:
//!
//! 1. the block must be US-ASCII
//! 2. `To-Path` and `From-Path` must be the first two lines
//! 3. responses stop here, everything else depends on the request method:
//!    - SEND and REPORT need a `Message-ID`, REPORT additionally a `Status`
//!    - NICKNAME needs a quoted `Use-Nickname`
//!    - unsupported methods are not inspected any further
//!
//! Header names are matched case-insensitively, unknown headers are skipped.
//!
//! # Report flags
//!
//! Invalid `Failure-Report` / `Success-Report` values are logged and ignored unless the
//! decoder is strict, in which case they make the header invalid.

use std::str::FromStr;

use mime::Mime;
use tracing::{debug, trace, warn};

use crate::protocol::{
    ByteRange, FailureReport, MessageId, Method, ParseError, StatusHeader, TransactionHeader, parse_path, parse_success_report,
};

/// What a header block belongs to.
#[derive(Debug, Copy, Clone)]
pub enum HeaderTarget<'a> {
    Response,
    Request(&'a Method),
}

#[derive(Debug, Copy, Clone, Default)]
pub struct HeaderDecoder {
    strict_report_headers: bool,
}

impl HeaderDecoder {
    pub fn new(strict_report_headers: bool) -> Self {
        Self { strict_report_headers }
    }

    pub fn decode(&self, block: &[u8], target: HeaderTarget<'_>) -> Result<TransactionHeader, ParseError> {
        if !block.is_ascii() {
            return Err(ParseError::invalid_header("header contains non US-ASCII bytes"));
        }
        let text = std::str::from_utf8(block).map_err(|e| ParseError::invalid_header(e.to_string()))?;
        let mut lines = text.split("\r\n").filter(|line| !line.is_empty());

        let to_path = parse_path(expect_header(lines.next(), "To-Path")?)?;
        let from_path = parse_path(expect_header(lines.next(), "From-Path")?)?;
        let mut header = TransactionHeader::new(to_path, from_path);

        let method = match target {
            HeaderTarget::Response => return Ok(header),
            HeaderTarget::Request(Method::Unsupported(_)) => return Ok(header),
            HeaderTarget::Request(method) => method,
        };

        for line in lines {
            let (name, value) = split_header(line)?;
            match method {
                Method::Nickname => self.nickname_field(&mut header, name, value)?,
                _ => self.message_field(&mut header, method, name, value)?,
            }
        }

        match method {
            Method::Send | Method::Report if header.message_id.is_none() => Err(ParseError::invalid_header("missing Message-ID")),
            Method::Report if header.status.is_none() => Err(ParseError::invalid_header("missing Status in REPORT")),
            Method::Nickname if header.nickname.is_none() => Err(ParseError::invalid_header("missing Use-Nickname")),
            _ => Ok(header),
        }
    }

    fn message_field(&self, header: &mut TransactionHeader, method: &Method, name: &str, value: &str) -> Result<(), ParseError> {
        if name.eq_ignore_ascii_case("Message-ID") {
            header.message_id = Some(MessageId::parse(value)?);
        } else if name.eq_ignore_ascii_case("Byte-Range") {
            header.byte_range = Some(ByteRange::from_str(value)?);
        } else if name.eq_ignore_ascii_case("Content-Type") {
            if header.content_type.is_none() {
                let mime = value.parse::<Mime>().map_err(|e| ParseError::invalid_header(format!("invalid Content-Type {value:?}: {e}")))?;
                header.content_type = Some(mime);
            }
        } else if name.eq_ignore_ascii_case("Failure-Report") {
            if let Some(failure_report) = self.report_value(FailureReport::from_str(value))? {
                header.failure_report = failure_report;
            }
        } else if name.eq_ignore_ascii_case("Success-Report") {
            if let Some(success_report) = self.report_value(parse_success_report(value))? {
                header.success_report = success_report;
            }
        } else if name.eq_ignore_ascii_case("Status") && *method == Method::Report {
            header.status = Some(StatusHeader::parse(value)?);
        } else {
            trace!(name, "skip unknown header");
        }
        Ok(())
    }

    fn nickname_field(&self, header: &mut TransactionHeader, name: &str, value: &str) -> Result<(), ParseError> {
        if name.eq_ignore_ascii_case("Use-Nickname") {
            let nickname = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .ok_or_else(|| ParseError::invalid_header(format!("Use-Nickname must be quoted: {value:?}")))?;
            header.nickname = Some(nickname.to_string());
        } else if name.eq_ignore_ascii_case("Failure-Report") || name.eq_ignore_ascii_case("Success-Report") {
            debug!(name, value, "ignore report header in NICKNAME request");
        } else {
            trace!(name, "skip unknown header");
        }
        Ok(())
    }

    fn report_value<T>(&self, parsed: Result<T, ParseError>) -> Result<Option<T>, ParseError> {
        match parsed {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.strict_report_headers => Err(e),
            Err(e) => {
                warn!(cause = %e, "ignore invalid report header value");
                Ok(None)
            }
        }
    }
}

/// Best effort `Failure-Report` lookup in a block that failed recognition.
///
/// Decides whether an invalid request is still owed a response.
pub fn sniff_failure_report(block: &[u8]) -> FailureReport {
    let Ok(text) = std::str::from_utf8(block) else {
        return FailureReport::Yes;
    };
    text.split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("Failure-Report"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or_default()
}

fn expect_header<'a>(line: Option<&'a str>, expected: &str) -> Result<&'a str, ParseError> {
    let line = line.ok_or_else(|| ParseError::invalid_header(format!("missing {expected}")))?;
    let (name, value) = split_header(line)?;
    if !name.eq_ignore_ascii_case(expected) {
        return Err(ParseError::invalid_header(format!("expected {expected} but found {name}")));
    }
    Ok(value)
}

fn split_header(line: &str) -> Result<(&str, &str), ParseError> {
    let (name, value) = line.split_once(':').ok_or_else(|| ParseError::invalid_header(format!("malformed header line {line:?}")))?;
    Ok((name.trim(), value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseCode;
    use indoc::indoc;

    fn block(s: &str) -> Vec<u8> {
        s.replace('\n', "\r\n").into_bytes()
    }

    const PATHS: &str = indoc! {"
        To-Path: msrp://bob.example.com:8888/9di4eae923wzd;tcp
        From-Path: msrp://alicepc.example.com:7777/iau39soe2843z;tcp
    "};

    #[test]
    fn decode_send_header() {
        let input = block(&format!(
            "{PATHS}{}",
            indoc! {"
                Message-ID: 87652491
                Byte-Range: 1-25/25
                failure-report: partial
                Success-Report: yes
                Content-Type: text/plain
                Content-Type: text/html
            "}
        ));
        let header = HeaderDecoder::default().decode(&input, HeaderTarget::Request(&Method::Send)).unwrap();
        assert_eq!(header.to_path[0].session_id(), "9di4eae923wzd");
        assert_eq!(header.from_path[0].host(), Some("alicepc.example.com"));
        assert_eq!(header.message_id.unwrap().as_str(), "87652491");
        assert_eq!(header.byte_range, Some(ByteRange::new(1, Some(25), Some(25))));
        assert_eq!(header.failure_report, FailureReport::Partial);
        assert!(header.success_report);
        assert_eq!(header.content_type, Some(mime::TEXT_PLAIN));
    }

    #[test]
    fn paths_must_come_first() {
        let input = block(indoc! {"
            Message-ID: 87652491
            To-Path: msrp://bob.example.com:8888/9di4eae923wzd;tcp
            From-Path: msrp://alicepc.example.com:7777/iau39soe2843z;tcp
        "});
        assert!(HeaderDecoder::default().decode(&input, HeaderTarget::Request(&Method::Send)).is_err());
        assert!(HeaderDecoder::default().decode(b"", HeaderTarget::Response).is_err());
    }

    #[test]
    fn missing_message_id() {
        let input = block(&format!("{PATHS}Byte-Range: 1-5/5\n"));
        assert!(matches!(
            HeaderDecoder::default().decode(&input, HeaderTarget::Request(&Method::Send)),
            Err(ParseError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn response_stops_after_paths() {
        let input = block(&format!("{PATHS}Message-ID: x\n"));
        let header = HeaderDecoder::default().decode(&input, HeaderTarget::Response).unwrap();
        assert!(header.message_id.is_none());
    }

    #[test]
    fn report_requires_status() {
        let input = block(&format!("{PATHS}Message-ID: 87652491\nByte-Range: 1-25/25\n"));
        assert!(HeaderDecoder::default().decode(&input, HeaderTarget::Request(&Method::Report)).is_err());

        let input = block(&format!("{PATHS}Message-ID: 87652491\nByte-Range: 1-25/25\nStatus: 000 200 OK\n"));
        let header = HeaderDecoder::default().decode(&input, HeaderTarget::Request(&Method::Report)).unwrap();
        assert_eq!(header.status.unwrap().code(), ResponseCode::Ok);
    }

    #[test]
    fn nickname_header() {
        let input = block(&format!("{PATHS}Use-Nickname: \"Alice the Great\"\nFailure-Report: no\n"));
        let header = HeaderDecoder::default().decode(&input, HeaderTarget::Request(&Method::Nickname)).unwrap();
        assert_eq!(header.nickname.as_deref(), Some("Alice the Great"));
        assert_eq!(header.failure_report, FailureReport::Yes);

        let input = block(&format!("{PATHS}Use-Nickname: Alice\n"));
        assert!(HeaderDecoder::default().decode(&input, HeaderTarget::Request(&Method::Nickname)).is_err());
    }

    #[test]
    fn unsupported_method_is_not_inspected() {
        let input = block(&format!("{PATHS}Whatever: value\n"));
        let method = Method::Unsupported("AUTH".to_string());
        assert!(HeaderDecoder::default().decode(&input, HeaderTarget::Request(&method)).is_ok());
    }

    #[test]
    fn lenient_and_strict_report_values() {
        let input = block(&format!("{PATHS}Message-ID: 87652491\nFailure-Report: sometimes\nSuccess-Report: maybe\n"));
        let header = HeaderDecoder::new(false).decode(&input, HeaderTarget::Request(&Method::Send)).unwrap();
        assert_eq!(header.failure_report, FailureReport::Yes);
        assert!(!header.success_report);

        assert!(HeaderDecoder::new(true).decode(&input, HeaderTarget::Request(&Method::Send)).is_err());
    }

    #[test]
    fn reject_non_ascii() {
        let input = block(&format!("{PATHS}Message-ID: 8765249é\n"));
        assert!(HeaderDecoder::default().decode(&input, HeaderTarget::Request(&Method::Send)).is_err());
    }

    #[test]
    fn sniff_failure_report_from_invalid_block() {
        let input = block("From-Path: broken\nFAILURE-REPORT: no\n");
        assert_eq!(sniff_failure_report(&input), FailureReport::No);
        assert_eq!(sniff_failure_report(b"garbage"), FailureReport::Yes);
    }
}
