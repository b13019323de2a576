//! MSRP connection handling module
//!
//! This module wires a byte stream pair to a [`TransactionManager`]: the read half
//! is framed by the [`TransactionDecoder`] and fed into incoming transactions, the
//! write half is filled from the manager's send queue.
//!
//! # Components
//!
//! - [`MsrpConnection`]: drives one connection until either side closes it
//! - [`TransactionReceiver`]: turns decoded frames into incoming transactions and
//!   hands them to the manager
//! - [`MessageWriter`]: the output buffer between the manager and the socket
//!
//! [`TransactionManager`]: crate::manager::TransactionManager
//! [`TransactionDecoder`]: crate::codec::TransactionDecoder

mod message_writer;
mod msrp_connection;
mod receiver;

pub use message_writer::MessageWriter;
pub use msrp_connection::MsrpConnection;
pub use receiver::TransactionReceiver;
