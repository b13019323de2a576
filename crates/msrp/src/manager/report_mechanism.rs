use std::fmt;

use crate::config::StackConfig;
use crate::protocol::Message;

/// Policy deciding how often progress is accounted and reported.
///
/// The granularity only drives how incoming body bytes are batched before they are
/// counted; it has no meaning on the wire.
pub trait ReportMechanism: Send + Sync + fmt::Debug {
    /// Body block size used when storing and counting received bytes.
    fn trigger_granularity(&self) -> usize;

    /// Whether the send progress of `message` is worth an `update_send_status`
    /// notification, `previous` is the sent count before the last write.
    fn should_trigger_sent_hook(&self, message: &Message, previous: u64) -> bool;

    /// Whether a success REPORT is due for a received message.
    fn should_generate_report(&self, message: &Message) -> bool {
        message.success_report() && message.is_complete()
    }

    fn count_received_body_block(&self, message: &mut Message, offset: u64, len: u64) {
        message.counter_mut().register(offset, len);
    }

    fn count_sent_body_bytes(&self, message: &mut Message, count: u64) {
        message.record_sent(count);
    }
}

/// Reports sent progress each time another granularity block went out, and once
/// the message is complete.
#[derive(Debug, Clone)]
pub struct DefaultReportMechanism {
    granularity: usize,
}

impl DefaultReportMechanism {
    pub fn new(granularity: usize) -> Self {
        Self { granularity: granularity.max(1) }
    }
}

impl Default for DefaultReportMechanism {
    fn default() -> Self {
        Self::new(StackConfig::default().report_granularity)
    }
}

impl ReportMechanism for DefaultReportMechanism {
    fn trigger_granularity(&self) -> usize {
        self.granularity
    }

    fn should_trigger_sent_hook(&self, message: &Message, previous: u64) -> bool {
        let granularity = self.granularity as u64;
        message.is_complete() || message.sent_bytes() / granularity != previous / granularity
    }
}
