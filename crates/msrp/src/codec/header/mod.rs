//! Header handling for MSRP transactions
//!
//! - [`HeaderDecoder`]: recognizes the header block of an incoming transaction
//!   - enforces the To-Path / From-Path prefix
//!   - validates the fields required by each method
//!   - applies the report flag strictness setting
//!
//! - [`HeaderEncoder`]: renders the start line and headers of an outgoing
//!   transaction or response

mod header_decoder;
mod header_encoder;

pub use header_decoder::{HeaderDecoder, HeaderTarget, sniff_failure_report};
pub use header_encoder::{Head, HeaderEncoder};
