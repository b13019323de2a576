use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::StackConfig;
use crate::manager::{DefaultReportMechanism, ReportMechanism, Session};
use crate::protocol::{ContainerError, DataContainer, FileContainer, MemoryContainer, MessageSize, MsrpUri};

/// Process-wide context shared by every connection and session.
///
/// Created once by the application and handed to sessions and connections; two
/// stacks never share state, which keeps tests independent.
#[derive(Debug)]
pub struct MsrpStack {
    config: StackConfig,
    report_mechanism: Arc<dyn ReportMechanism>,
    /// sessions waiting for the first request on an inbound connection, by local URI
    pending: Mutex<HashMap<MsrpUri, Arc<Session>>>,
    /// local URIs of sessions bound to a connection
    active: Mutex<HashSet<MsrpUri>>,
}

impl MsrpStack {
    pub fn new(config: StackConfig) -> Arc<Self> {
        let report_mechanism = Arc::new(DefaultReportMechanism::new(config.report_granularity));
        Self::with_report_mechanism(config, report_mechanism)
    }

    pub fn with_report_mechanism(config: StackConfig, report_mechanism: Arc<dyn ReportMechanism>) -> Arc<Self> {
        Arc::new(Self { config, report_mechanism, pending: Mutex::new(HashMap::new()), active: Mutex::new(HashSet::new()) })
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn report_mechanism(&self) -> &Arc<dyn ReportMechanism> {
        &self.report_mechanism
    }

    /// Registers a session whose peer is expected to connect to us.
    ///
    /// The session is bound to whichever connection first carries a request
    /// addressed to its URI.
    pub fn expect_session(&self, session: Arc<Session>) {
        debug!(session = %session.uri(), "expect inbound session");
        self.pending.lock().insert(session.uri().clone(), session);
    }

    pub(crate) fn take_pending(&self, uri: &MsrpUri) -> Option<Arc<Session>> {
        self.pending.lock().remove(uri)
    }

    /// Whether a session with this local URI is bound to some connection.
    pub fn is_active(&self, uri: &MsrpUri) -> bool {
        self.active.lock().contains(uri)
    }

    /// Returns false when the URI was active already.
    pub(crate) fn activate(&self, uri: &MsrpUri) -> bool {
        self.active.lock().insert(uri.clone())
    }

    pub(crate) fn deactivate(&self, uri: &MsrpUri) {
        if !self.active.lock().remove(uri) {
            warn!(session = %uri, "deactivate a session that was not active");
        }
    }

    /// Storage for an incoming message of `size`.
    ///
    /// Messages known to fit `short_message_max` are kept in memory, the others go
    /// to a temporary file.
    pub fn new_container(&self, size: MessageSize) -> Result<Box<dyn DataContainer>, ContainerError> {
        let max = self.config.short_message_max;
        match size.known().and_then(|size| usize::try_from(size).ok()) {
            Some(size) if size <= max => Ok(Box::new(MemoryContainer::with_size(size))),
            _ => Ok(Box::new(FileContainer::temporary()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_depends_on_size() {
        let stack = MsrpStack::new(StackConfig::builder().short_message_max(16).build());

        let container = stack.new_container(MessageSize::Known(10)).unwrap();
        assert_eq!(container.size(), 10);

        let mut container = stack.new_container(MessageSize::Known(100)).unwrap();
        container.put_at(90, b"0123456789").unwrap();
        assert_eq!(container.size(), 100);

        let mut container = stack.new_container(MessageSize::Unknown).unwrap();
        container.put_at(0, &[7; 64]).unwrap();
        assert_eq!(container.size(), 64);
    }

    #[test]
    fn active_registry() {
        let stack = MsrpStack::new(StackConfig::default());
        let uri = MsrpUri::parse("msrp://alice.example.com:7777/iau39soe2843z;tcp").unwrap();
        assert!(!stack.is_active(&uri));
        assert!(stack.activate(&uri));
        assert!(!stack.activate(&uri));
        assert!(stack.is_active(&uri));
        stack.deactivate(&uri);
        assert!(!stack.is_active(&uri));
    }

    #[test]
    fn pending_sessions_are_taken_once() {
        let stack = MsrpStack::new(StackConfig::default());
        let uri = MsrpUri::parse("msrp://alice.example.com:7777/iau39soe2843z;tcp").unwrap();
        let session = Session::builder(&stack, uri.clone()).build().unwrap();
        stack.expect_session(session);
        assert!(stack.take_pending(&uri).is_some());
        assert!(stack.take_pending(&uri).is_none());
    }
}
