//! MSRP status vocabulary.
//!
//! [`ResponseCode`] covers the response codes this engine produces and consumes
//! (RFC 4975 section 10 and RFC 4976). [`StatusHeader`] is the parsed form of the
//! `Status:` header carried by REPORT requests.

use std::fmt;

use crate::protocol::ParseError;

/// The only status namespace defined by RFC 4975.
pub const STATUS_NAMESPACE: u16 = 0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    BadRequest,
    Forbidden,
    RequestTimeout,
    StopSending,
    UnsupportedMediaType,
    IntervalOutOfBounds,
    NicknameInUse,
    SessionDoesNotExist,
    NotImplemented,
    WrongConnection,
}

impl ResponseCode {
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::RequestTimeout => 408,
            Self::StopSending => 413,
            Self::UnsupportedMediaType => 415,
            Self::IntervalOutOfBounds => 423,
            Self::NicknameInUse => 425,
            Self::SessionDoesNotExist => 481,
            Self::NotImplemented => 501,
            Self::WrongConnection => 506,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::RequestTimeout => "Request Timeout",
            Self::StopSending => "Stop Sending",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::IntervalOutOfBounds => "Interval Out-of-Bounds",
            Self::NicknameInUse => "Nickname In Use",
            Self::SessionDoesNotExist => "Session Does Not Exist",
            Self::NotImplemented => "Not Implemented",
            Self::WrongConnection => "Wrong Session",
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        let response_code = match code {
            200 => Self::Ok,
            400 => Self::BadRequest,
            403 => Self::Forbidden,
            408 => Self::RequestTimeout,
            413 => Self::StopSending,
            415 => Self::UnsupportedMediaType,
            423 => Self::IntervalOutOfBounds,
            425 => Self::NicknameInUse,
            481 => Self::SessionDoesNotExist,
            501 => Self::NotImplemented,
            506 => Self::WrongConnection,
            _ => return None,
        };
        Some(response_code)
    }

    #[inline]
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.code())
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// `Status: <namespace> <code> [comment]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusHeader {
    namespace: u16,
    code: ResponseCode,
    comment: Option<String>,
}

impl StatusHeader {
    pub fn new(code: ResponseCode) -> Self {
        Self { namespace: STATUS_NAMESPACE, code, comment: Some(code.reason().to_string()) }
    }

    pub fn with_comment(code: ResponseCode, comment: Option<String>) -> Self {
        Self { namespace: STATUS_NAMESPACE, code, comment }
    }

    pub fn namespace(&self) -> u16 {
        self.namespace
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Parses the value part of a `Status:` header.
    ///
    /// The namespace must be `000` and the code must be one of the recognized
    /// [`ResponseCode`]s.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let mut parts = value.splitn(3, ' ');
        let namespace = parse_three_digits(parts.next().unwrap_or_default())
            .ok_or_else(|| ParseError::invalid_header(format!("invalid status namespace in {value:?}")))?;
        if namespace != STATUS_NAMESPACE {
            return Err(ParseError::invalid_header(format!("unsupported status namespace {namespace:03}")));
        }

        let raw_code = parse_three_digits(parts.next().unwrap_or_default())
            .ok_or_else(|| ParseError::invalid_header(format!("invalid status code in {value:?}")))?;
        let code = ResponseCode::from_code(raw_code)
            .ok_or_else(|| ParseError::invalid_header(format!("unrecognized status code {raw_code}")))?;

        let comment = parts.next().map(str::trim).filter(|c| !c.is_empty()).map(str::to_string);
        Ok(Self { namespace, code, comment })
    }
}

impl fmt::Display for StatusHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03} {}", self.namespace, self.code.code())?;
        if let Some(comment) = &self.comment {
            write!(f, " {comment}")?;
        }
        Ok(())
    }
}

pub(crate) fn parse_three_digits(s: &str) -> Option<u16> {
    if s.len() != 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_code_round_trip() {
        for code in [200, 400, 403, 408, 413, 415, 423, 425, 481, 501, 506] {
            assert_eq!(ResponseCode::from_code(code).map(ResponseCode::code), Some(code));
        }
        assert_eq!(ResponseCode::from_code(299), None);
        assert!(ResponseCode::Ok.is_success());
        assert!(!ResponseCode::StopSending.is_success());
    }

    #[test]
    fn parse_status_header() {
        let status = StatusHeader::parse("000 200 OK").unwrap();
        assert_eq!(status.code(), ResponseCode::Ok);
        assert_eq!(status.comment(), Some("OK"));
        assert_eq!(status.to_string(), "000 200 OK");

        let status = StatusHeader::parse("000 413").unwrap();
        assert_eq!(status.code(), ResponseCode::StopSending);
        assert_eq!(status.comment(), None);
    }

    #[test]
    fn reject_bad_status_header() {
        assert!(StatusHeader::parse("001 200 OK").is_err());
        assert!(StatusHeader::parse("000 299 Whatever").is_err());
        assert!(StatusHeader::parse("000 20").is_err());
        assert!(StatusHeader::parse("").is_err());
    }
}
