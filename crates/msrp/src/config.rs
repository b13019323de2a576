//! Stack configuration.
//!
//! [`StackConfig`] can be built with [`StackConfig::builder`] or deserialized as part
//! of a larger application configuration; every field has a default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest output buffer the writer accepts: it must always hold a full end-line
/// pattern for the longest transaction id plus some body.
pub const MIN_OUTPUT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Maximum body bytes per SEND, `0` sends every message as one chunk.
    pub chunk_size: usize,
    /// Messages up to this size are stored in memory, larger ones in a file.
    pub short_message_max: usize,
    /// Body block size used to account received bytes.
    pub report_granularity: usize,
    /// Reject invalid Failure-Report / Success-Report values instead of ignoring them.
    pub strict_report_headers: bool,
    pub max_header_bytes: usize,
    pub output_buffer_size: usize,
    pub response_timeout_secs: u64,
    pub idle_wait_millis: u64,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2048,
            short_message_max: 1024 * 1024,
            report_granularity: 8 * 1024,
            strict_report_headers: false,
            max_header_bytes: 16 * 1024,
            output_buffer_size: 16 * 1024,
            response_timeout_secs: 30,
            idle_wait_millis: 1000,
        }
    }
}

impl StackConfig {
    pub fn builder() -> StackConfigBuilder {
        StackConfigBuilder { config: StackConfig::default() }
    }

    pub fn chunk_size(&self) -> Option<usize> {
        (self.chunk_size > 0).then_some(self.chunk_size)
    }

    pub fn output_buffer_size(&self) -> usize {
        self.output_buffer_size.max(MIN_OUTPUT_BUFFER_SIZE)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_millis)
    }
}

#[derive(Debug)]
pub struct StackConfigBuilder {
    config: StackConfig,
}

impl StackConfigBuilder {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn short_message_max(mut self, short_message_max: usize) -> Self {
        self.config.short_message_max = short_message_max;
        self
    }

    pub fn report_granularity(mut self, report_granularity: usize) -> Self {
        self.config.report_granularity = report_granularity.max(1);
        self
    }

    pub fn strict_report_headers(mut self, strict: bool) -> Self {
        self.config.strict_report_headers = strict;
        self
    }

    pub fn max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.config.max_header_bytes = max_header_bytes;
        self
    }

    pub fn output_buffer_size(mut self, output_buffer_size: usize) -> Self {
        self.config.output_buffer_size = output_buffer_size;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout_secs = timeout.as_secs();
        self
    }

    pub fn idle_wait(mut self, idle_wait: Duration) -> Self {
        self.config.idle_wait_millis = u64::try_from(idle_wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn build(self) -> StackConfig {
        self.config
    }
}
