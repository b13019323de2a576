//! Core MSRP protocol vocabulary.
//!
//! This module holds the types every other layer speaks in: identifiers and header
//! values, status codes, URIs, the per-message [`Counter`], the [`DataContainer`]
//! storage abstraction, the [`Message`] itself and the error types.
//!
//! # Architecture
//!
//! - **Header values** ([`header`]): [`TransactionId`], [`MessageId`], [`ByteRange`],
//!   [`ContinuationFlag`], [`FailureReport`], [`Method`] and [`TransactionHeader`]
//! - **Status** ([`status`]): [`ResponseCode`] and the REPORT [`StatusHeader`]
//! - **Addressing** ([`uri`]): [`MsrpUri`] and path helpers
//! - **Messages** ([`message`]): [`Message`] glued to a [`DataContainer`], tracked
//!   by a [`Counter`] when incoming
//! - **Error Handling** ([`error`]):
//!   - [`MsrpError`]: Top-level error type
//!   - [`ParseError`]: framing and header errors
//!   - [`ContainerError`]: storage capacity and availability errors

mod counter;
pub use counter::Counter;

pub mod container;
pub use container::{DataContainer, FileContainer, MemoryContainer};

mod error;
pub use error::ContainerError;
pub use error::MsrpError;
pub use error::ParseError;

mod header;
pub(crate) use header::parse_success_report;
pub use header::{ByteRange, ContinuationFlag, FailureReport, GENERATED_TID_LEN, MessageId, Method, TransactionHeader, TransactionId};

mod message;
pub use message::{Direction, Message, MessageRef, MessageSize, MessageState, TransactionSnapshot};

mod status;
pub(crate) use status::parse_three_digits;
pub use status::{ResponseCode, STATUS_NAMESPACE, StatusHeader};

mod uri;
pub(crate) use uri::format_path;
pub use uri::{MsrpUri, parse_path};
