//! Priority message channels
//!
//! A channel is a named mailbox with three priority tiers, bounded
//! capacity (producers get [`ChannelError::QueueFull`] instead of an
//! ever-growing buffer) and fan-out delivery to live subscribers.
//! Queues are in memory only.

pub mod error;
pub mod message;
pub mod message_channel;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod subscriber;

pub use error::ChannelError;
pub use message::{Message, Priority};
pub use message_channel::{ChannelOptions, MessageChannel};
pub use queue::MessageQueue;
pub use registry::ChannelRegistry;
pub use stats::ChannelStats;
pub use subscriber::{Subscriber, SubscriberId, Subscription};
