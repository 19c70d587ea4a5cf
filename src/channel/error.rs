//! Channel error types

use std::time::Duration;
use thiserror::Error;

/// Errors returned by channel operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Backpressure: the queue is at capacity. The producer decides whether
    /// and when to retry.
    #[error("channel '{channel}' queue full (max {max_queue_size})")]
    QueueFull {
        channel: String,
        max_queue_size: usize,
    },

    /// The worker did not answer within the call timeout
    #[error("channel '{channel}' did not respond within {timeout:?}")]
    Timeout { channel: String, timeout: Duration },

    /// The worker has stopped
    #[error("channel '{0}' is closed")]
    Closed(String),
}

impl ChannelError {
    /// Whether the producer may reasonably retry later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::QueueFull { .. } | ChannelError::Timeout { .. })
    }
}

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;
