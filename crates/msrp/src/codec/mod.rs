//! MSRP codec module for framing transactions on a byte stream
//!
//! # Architecture
//!
//! - Incoming:
//!   - [`TransactionDecoder`]: splits the stream into [`Frame`]s (start line, header
//!     block, body slices, end-line)
//!   - [`HeaderDecoder`]: recognizes a header block once it is complete
//!
//! - Outgoing:
//!   - [`HeaderEncoder`]: renders start line and headers
//!   - [`EndLineScanner`]: detects body bytes that would read as the end-line
//!   - [`end_line`]: renders the end-line itself
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use micro_msrp::codec::{Frame, TransactionDecoder};
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = TransactionDecoder::new();
//! let mut buf = BytesMut::from(&b"MSRP a786hjs2 200 OK\r\n"[..]);
//! let frame = decoder.decode(&mut buf).unwrap();
//! assert!(matches!(frame, Some(Frame::Start(line)) if line.is_response()));
//! ```

mod end_line;
mod header;
mod start_line;
mod transaction_decoder;

pub(crate) use end_line::END_LINE_OVERHEAD;
pub use end_line::{EndLineScanner, end_line};
pub use header::{Head, HeaderDecoder, HeaderEncoder, HeaderTarget, sniff_failure_report};
pub use start_line::{StartLine, StartLineKind, response_code_of};
pub use transaction_decoder::{Frame, TransactionDecoder};
