//! Typed MSRP header values.
//!
//! These are the building blocks shared by the header decoder and encoder:
//! identifiers, the Byte-Range triple, report flags, the continuation flag
//! and the [`TransactionHeader`] that collects them for one transaction.

use std::fmt;
use std::str::FromStr;

use mime::Mime;

use crate::protocol::{MsrpUri, ParseError, StatusHeader};
use crate::utils::random_alphanumeric;

/// Length of the transaction ids generated by this engine.
pub const GENERATED_TID_LEN: usize = 8;

const IDENT_MIN_LEN: usize = 4;
const IDENT_MAX_LEN: usize = 32;

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'+' | b'%' | b'=')
}

/// RFC 4975 `ident`: 4 to 32 characters, first one alphanumeric.
fn is_ident(s: &str) -> bool {
    let bytes = s.as_bytes();
    (IDENT_MIN_LEN..=IDENT_MAX_LEN).contains(&bytes.len()) && bytes[0].is_ascii_alphanumeric() && bytes.iter().all(|b| is_ident_char(*b))
}

/// The id of one transaction, unique per connection for the transactions we originate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(String);

impl TransactionId {
    /// Creates a random 8 character alphanumeric id.
    pub fn generate() -> Self {
        Self(random_alphanumeric(GENERATED_TID_LEN))
    }

    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if is_ident(s) { Ok(Self(s.to_string())) } else { Err(ParseError::InvalidTransactionId(s.to_string())) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(random_alphanumeric(10))
    }

    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if is_ident(s) { Ok(Self(s.to_string())) } else { Err(ParseError::invalid_header(format!("invalid message id {s:?}"))) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `$`, `+` or `#` ending a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ContinuationFlag {
    /// `$`: last chunk of the message
    End,
    /// `+`: more chunks follow
    Interrupt,
    /// `#`: the message is aborted
    Abort,
}

impl ContinuationFlag {
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::End => b'$',
            Self::Interrupt => b'+',
            Self::Abort => b'#',
        }
    }

    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'$' => Some(Self::End),
            b'+' => Some(Self::Interrupt),
            b'#' => Some(Self::Abort),
            _ => None,
        }
    }
}

/// `Failure-Report` header values, `yes` when absent.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum FailureReport {
    #[default]
    Yes,
    No,
    Partial,
}

impl FailureReport {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Partial => "partial",
        }
    }
}

impl FromStr for FailureReport {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            "partial" => Ok(Self::Partial),
            _ => Err(ParseError::invalid_header(format!("invalid Failure-Report value {s:?}"))),
        }
    }
}

pub(crate) fn parse_success_report(s: &str) -> Result<bool, ParseError> {
    match s.to_ascii_lowercase().as_str() {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(ParseError::invalid_header(format!("invalid Success-Report value {s:?}"))),
    }
}

/// `Byte-Range: <start>-<end|*>/<total|*>`, with 1-based inclusive offsets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
    pub total: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>, total: Option<u64>) -> Self {
        Self { start, end, total }
    }

    /// Zero based offset of the first body byte.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.start.saturating_sub(1)
    }
}

impl Default for ByteRange {
    /// `1-*/*`, the value assumed when a SEND carries no Byte-Range.
    fn default() -> Self {
        Self { start: 1, end: None, total: None }
    }
}

impl FromStr for ByteRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::invalid_header(format!("invalid Byte-Range {s:?}"));
        let (range, total) = s.split_once('/').ok_or_else(invalid)?;
        let (start, end) = range.split_once('-').ok_or_else(invalid)?;

        let start = start.trim().parse::<u64>().map_err(|_| invalid())?;
        let end = match end.trim() {
            "*" => None,
            v => Some(v.parse::<u64>().map_err(|_| invalid())?),
        };
        let total = match total.trim() {
            "*" => None,
            v => Some(v.parse::<u64>().map_err(|_| invalid())?),
        };
        if start == 0 {
            return Err(invalid());
        }
        Ok(Self { start, end, total })
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.start)?;
        match self.end {
            Some(end) => write!(f, "{end}")?,
            None => f.write_str("*")?,
        }
        f.write_str("/")?;
        match self.total {
            Some(total) => write!(f, "{total}"),
            None => f.write_str("*"),
        }
    }
}

/// The request method from the start line; anything unknown is [`Method::Unsupported`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Send,
    Report,
    Nickname,
    Unsupported(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Send => "SEND",
            Self::Report => "REPORT",
            Self::Nickname => "NICKNAME",
            Self::Unsupported(method) => method,
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "SEND" => Self::Send,
            "REPORT" => Self::Report,
            "NICKNAME" => Self::Nickname,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

/// All header fields of one transaction.
///
/// For incoming transactions the fields are filled in one pass by the header
/// decoder; for outgoing transactions they are the template the header encoder
/// renders.
#[derive(Debug, Clone, Default)]
pub struct TransactionHeader {
    pub to_path: Vec<MsrpUri>,
    pub from_path: Vec<MsrpUri>,
    pub message_id: Option<MessageId>,
    pub byte_range: Option<ByteRange>,
    pub content_type: Option<Mime>,
    pub failure_report: FailureReport,
    pub success_report: bool,
    pub status: Option<StatusHeader>,
    pub nickname: Option<String>,
}

impl TransactionHeader {
    pub fn new(to_path: Vec<MsrpUri>, from_path: Vec<MsrpUri>) -> Self {
        Self { to_path, from_path, ..Default::default() }
    }

    /// Byte-Range of the transaction, `1-*/*` when absent.
    pub fn byte_range_or_default(&self) -> ByteRange {
        self.byte_range.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_validation() {
        assert!(TransactionId::parse("a786hjs2").is_ok());
        assert!(TransactionId::parse("dkei38sd").is_ok());
        assert!(TransactionId::parse("abc").is_err());
        assert!(TransactionId::parse("-abcdefg").is_err());
        assert!(TransactionId::parse("abc def1").is_err());
        assert!(TransactionId::parse(&"a".repeat(33)).is_err());

        let generated = TransactionId::generate();
        assert_eq!(generated.len(), GENERATED_TID_LEN);
        assert!(TransactionId::parse(generated.as_str()).is_ok());
    }

    #[test]
    fn message_id_validation() {
        assert!(MessageId::parse("12339sdqwer").is_ok());
        assert!(MessageId::parse("a.b-c+d%e=f").is_ok());
        assert!(MessageId::parse("abc").is_err());
        assert!(MessageId::parse(".abcd").is_err());
    }

    #[test]
    fn byte_range_parse_and_display() {
        let range: ByteRange = "1-5/11".parse().unwrap();
        assert_eq!(range, ByteRange::new(1, Some(5), Some(11)));
        assert_eq!(range.offset(), 0);
        assert_eq!(range.to_string(), "1-5/11");

        let range: ByteRange = "6-*/*".parse().unwrap();
        assert_eq!(range, ByteRange::new(6, None, None));
        assert_eq!(range.to_string(), "6-*/*");

        assert!("0-5/11".parse::<ByteRange>().is_err());
        assert!("1-5".parse::<ByteRange>().is_err());
        assert!("a-5/11".parse::<ByteRange>().is_err());
    }

    #[test]
    fn report_flags_are_case_insensitive() {
        assert_eq!("PARTIAL".parse::<FailureReport>().unwrap(), FailureReport::Partial);
        assert_eq!("No".parse::<FailureReport>().unwrap(), FailureReport::No);
        assert!("maybe".parse::<FailureReport>().is_err());
        assert!(parse_success_report("YES").unwrap());
        assert!(parse_success_report("partial").is_err());
    }

    #[test]
    fn continuation_flag_bytes() {
        for flag in [ContinuationFlag::End, ContinuationFlag::Interrupt, ContinuationFlag::Abort] {
            assert_eq!(ContinuationFlag::from_byte(flag.as_byte()), Some(flag));
        }
        assert_eq!(ContinuationFlag::from_byte(b'x'), None);
    }
}
