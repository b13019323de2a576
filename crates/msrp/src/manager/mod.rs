//! Sessions, scheduling and routing above single transactions.
//!
//! - [`MsrpStack`]: the process-wide context every session and connection hangs off
//! - [`Session`]: a local MSRP URI with its peer path, listener and accept hook
//! - [`TransactionManager`]: one per connection; owns the send queue, the table of
//!   transactions waiting for a response and the sessions bound to the connection
//! - [`ReportMechanism`]: the accounting policy for sent and received body bytes
//!
//! Locks are taken in the order manager, session, message. Listener callbacks run
//! after every lock was released.

mod listener;
mod report_mechanism;
mod session;
mod stack;
mod transaction_manager;

#[cfg(test)]
pub(crate) use listener::MockSessionListener;
pub use listener::{AbortReason, AcceptHook, DefaultAcceptHook, DefaultSessionListener, ReceivedReport, SessionListener};
pub use report_mechanism::{DefaultReportMechanism, ReportMechanism};
pub use session::{Session, SessionBuilder};
pub use stack::MsrpStack;
pub use transaction_manager::TransactionManager;
