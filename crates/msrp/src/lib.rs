//! An asynchronous micro MSRP (RFC 4975) transaction engine
//!
//! This crate implements the core of a Message Session Relay Protocol stack: the
//! incremental framing of transactions on a byte stream, the transaction lifecycle
//! with its responses and REPORTs, and the chunked, interruptible sending of
//! messages from several sessions sharing one connection. It is built on top of
//! tokio.
//!
//! # Features
//!
//! - Non-blocking transaction decoding from arbitrary stream slices
//! - Chunked sending with end-line collision detection in body content
//! - Priority insertion of responses and REPORTs, interrupting chunks on the wire
//! - Success and failure reports, receiver and sender side aborts
//! - NICKNAME requests (RFC 4976)
//! - Memory or temporary file storage for incoming messages
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use micro_msrp::config::StackConfig;
//! use micro_msrp::connection::MsrpConnection;
//! use micro_msrp::manager::{MsrpStack, Session, TransactionManager};
//! use micro_msrp::protocol::{MsrpUri, parse_path};
//! use tokio::net::TcpStream;
//! use tracing::{error, info};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stack = MsrpStack::new(StackConfig::default());
//!     let session = Session::builder(&stack, MsrpUri::parse("msrp://127.0.0.1:2855/iau39soe2843z;tcp")?)
//!         .to_path(parse_path("msrp://127.0.0.1:2856/9di4eae923wzd;tcp")?)
//!         .build()?;
//!
//!     let (reader, writer) = TcpStream::connect("127.0.0.1:2856").await?.into_split();
//!     let manager = TransactionManager::new(Arc::clone(&stack));
//!     manager.bind_session(&session)?;
//!     session.send_message(mime::TEXT_PLAIN, b"Hi, I'm Alice!")?;
//!
//!     match MsrpConnection::new(reader, writer, manager).process().await {
//!         Ok(()) => info!("finished process, connection shutdown"),
//!         Err(e) => error!(cause = %e, "connection failed"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`protocol`]: vocabulary types, messages, data containers and errors
//! - [`codec`]: start lines, the incremental [`codec::TransactionDecoder`], header
//!   recognition and encoding, end-lines
//! - [`transaction`]: the per-transaction state machine
//! - [`manager`]: sessions, the stack context and the per-connection
//!   [`manager::TransactionManager`]
//! - [`connection`]: tokio reader and writer wiring
//! - [`config`]: [`config::StackConfig`]
//!
//! # Concurrency
//!
//! Each connection has one reader and one writer task; applications send from any
//! thread. They all meet in the connection's `TransactionManager`, whose queue,
//! in-flight table and session map sit behind a single lock. The writer waits on a
//! notification with a bounded timeout and is woken whenever a transaction is queued.
//!
//! # Error Handling
//!
//! - [`protocol::MsrpError`]: Top-level error type
//! - [`protocol::ParseError`]: framing and header errors
//! - [`protocol::ContainerError`]: storage errors
//!
//! Malformed headers and body storage failures degrade a single transaction to an
//! error response. Data that can not be framed at all closes the connection.
//!
//! # Limitations
//!
//! - No TLS, relays or connection establishment; the application connects sockets
//!   and hands them to [`connection::MsrpConnection`]

pub mod codec;
pub mod config;
pub mod connection;
pub mod manager;
pub mod protocol;
pub mod transaction;

mod utils;
