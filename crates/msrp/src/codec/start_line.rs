//! Request and response start lines.
//!
//! ```text
//! MSRP SP transact-id SP method CRLF
//! MSRP SP transact-id SP status-code [SP comment] CRLF
//! ```

use crate::protocol::{Method, ParseError, ResponseCode, TransactionId, parse_three_digits};

pub(crate) const PROTOCOL_PREFIX: &[u8] = b"MSRP ";

/// Longest start line accepted before giving up on framing.
pub(crate) const MAX_START_LINE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartLine {
    pub tid: TransactionId,
    pub kind: StartLineKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLineKind {
    Request(Method),
    Response { code: u16, comment: Option<String> },
}

impl StartLine {
    #[inline]
    pub fn is_response(&self) -> bool {
        matches!(self.kind, StartLineKind::Response { .. })
    }

    /// Parses one start line, `line` excludes the trailing CRLF.
    pub fn parse(line: &[u8]) -> Result<Self, ParseError> {
        if !line.is_ascii() {
            return Err(ParseError::invalid_start_line("start line contains non US-ASCII bytes"));
        }
        let rest = line.strip_prefix(PROTOCOL_PREFIX).ok_or_else(|| ParseError::invalid_start_line("missing MSRP prefix"))?;
        let rest = std::str::from_utf8(rest).map_err(|e| ParseError::invalid_start_line(e.to_string()))?;

        let (tid, rest) = rest.split_once(' ').ok_or_else(|| ParseError::invalid_start_line(format!("no method or status in {rest:?}")))?;
        let tid = TransactionId::parse(tid)?;

        let (token, comment) = match rest.split_once(' ') {
            Some((token, comment)) => (token, Some(comment)),
            None => (rest, None),
        };

        if let Some(code) = parse_three_digits(token) {
            let comment = comment.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string);
            return Ok(Self { tid, kind: StartLineKind::Response { code, comment } });
        }

        if comment.is_some() || token.is_empty() || !token.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(ParseError::invalid_start_line(format!("invalid method {rest:?}")));
        }
        Ok(Self { tid, kind: StartLineKind::Request(Method::from(token)) })
    }
}

/// Maps a response status to the known vocabulary, unknown codes fall back to their class.
pub fn response_code_of(code: u16) -> ResponseCode {
    ResponseCode::from_code(code).unwrap_or(match code {
        200..=299 => ResponseCode::Ok,
        500..=599 => ResponseCode::NotImplemented,
        _ => ResponseCode::BadRequest,
    })
}

/// Whether `buf` could still turn into a valid start line.
pub(crate) fn is_start_line_prefix(buf: &[u8]) -> bool {
    let n = buf.len().min(PROTOCOL_PREFIX.len());
    buf[..n] == PROTOCOL_PREFIX[..n]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_line() {
        let line = StartLine::parse(b"MSRP a786hjs2 SEND").unwrap();
        assert_eq!(line.tid.as_str(), "a786hjs2");
        assert_eq!(line.kind, StartLineKind::Request(Method::Send));
        assert!(!line.is_response());

        let line = StartLine::parse(b"MSRP dkei38sd REPORT").unwrap();
        assert_eq!(line.kind, StartLineKind::Request(Method::Report));

        let line = StartLine::parse(b"MSRP dkei38sd AUTH").unwrap();
        assert_eq!(line.kind, StartLineKind::Request(Method::Unsupported("AUTH".to_string())));
    }

    #[test]
    fn parse_response_line() {
        let line = StartLine::parse(b"MSRP a786hjs2 200 OK").unwrap();
        assert!(line.is_response());
        assert_eq!(line.kind, StartLineKind::Response { code: 200, comment: Some("OK".to_string()) });

        let line = StartLine::parse(b"MSRP a786hjs2 481").unwrap();
        assert_eq!(line.kind, StartLineKind::Response { code: 481, comment: None });
    }

    #[test]
    fn reject_bad_start_lines() {
        assert!(StartLine::parse(b"HTTP/1.1 200 OK").is_err());
        assert!(StartLine::parse(b"MSRP a786hjs2").is_err());
        assert!(StartLine::parse(b"MSRP ab SEND").is_err());
        assert!(StartLine::parse(b"MSRP a786hjs2 send").is_err());
        assert!(StartLine::parse(b"MSRP a786hjs2 SEND extra").is_err());
        assert!(StartLine::parse("MSRP a786hjs2 SENDé".as_bytes()).is_err());
    }

    #[test]
    fn unknown_codes_map_to_class() {
        assert_eq!(response_code_of(202), ResponseCode::Ok);
        assert_eq!(response_code_of(499), ResponseCode::BadRequest);
        assert_eq!(response_code_of(413), ResponseCode::StopSending);
    }

    #[test]
    fn start_line_prefix() {
        assert!(is_start_line_prefix(b"MS"));
        assert!(is_start_line_prefix(b"MSRP abc"));
        assert!(!is_start_line_prefix(b"GET /"));
    }
}
