//! Channel statistics snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time copy of a channel's counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Channel name
    pub name: String,

    /// Messages accepted into the queue
    pub published: u64,

    /// Successful sends to subscribers, one per subscriber per message.
    ///
    /// Sends skipped because a mailbox was full (`lagged`) or closed are not
    /// counted, so this can be lower than messages times subscribers.
    pub delivered: u64,

    /// Publishes rejected because the queue was full
    pub dropped: u64,

    /// Accepted messages discarded because nobody was subscribed
    pub unconsumed: u64,

    /// Sends skipped because a bounded subscriber mailbox was full
    pub lagged: u64,

    /// Messages currently waiting
    pub queue_size: usize,

    /// Currently registered subscribers
    pub subscriber_count: usize,

    /// When the channel worker started
    pub started_at: DateTime<Utc>,

    /// Milliseconds since start
    pub uptime_ms: u64,
}
