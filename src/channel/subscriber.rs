//! Delivery targets registered with a channel

use crate::channel::message::Message;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier handed out by a channel on subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

#[derive(Debug, Clone)]
enum Target {
    Unbounded(mpsc::UnboundedSender<Arc<Message>>),
    Bounded(mpsc::Sender<Arc<Message>>),
}

/// Result of a single non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    /// Bounded mailbox is full, this message is skipped for this subscriber
    Full,
    /// The receiving side is gone
    Closed,
}

/// A delivery target
///
/// Subscribers are monitored by default: when the receiving half of the
/// mailbox is dropped, the channel removes the subscriber on its own.
#[derive(Debug, Clone)]
pub struct Subscriber {
    target: Target,
    monitored: bool,
}

impl Subscriber {
    /// Deliver into an unbounded mailbox
    pub fn unbounded(sender: mpsc::UnboundedSender<Arc<Message>>) -> Self {
        Self {
            target: Target::Unbounded(sender),
            monitored: true,
        }
    }

    /// Deliver into a bounded mailbox; messages are skipped while it is full
    pub fn bounded(sender: mpsc::Sender<Arc<Message>>) -> Self {
        Self {
            target: Target::Bounded(sender),
            monitored: true,
        }
    }

    /// Do not watch the target for termination.
    ///
    /// A dead unmonitored subscriber is only noticed (and removed) the next
    /// time a delivery to it fails.
    pub fn unmonitored(mut self) -> Self {
        self.monitored = false;
        self
    }

    pub fn is_monitored(&self) -> bool {
        self.monitored
    }

    pub fn is_closed(&self) -> bool {
        match &self.target {
            Target::Unbounded(tx) => tx.is_closed(),
            Target::Bounded(tx) => tx.is_closed(),
        }
    }

    pub(crate) fn try_deliver(&self, message: Arc<Message>) -> Delivery {
        match &self.target {
            Target::Unbounded(tx) => match tx.send(message) {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Closed,
            },
            Target::Bounded(tx) => match tx.try_send(message) {
                Ok(()) => Delivery::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
        }
    }

    /// Future resolving once the target terminates, if monitored
    pub(crate) fn liveness(&self) -> Option<BoxFuture<'static, ()>> {
        if !self.monitored {
            return None;
        }
        let watch = match self.target.clone() {
            Target::Unbounded(tx) => async move { tx.closed().await }.boxed(),
            Target::Bounded(tx) => async move { tx.closed().await }.boxed(),
        };
        Some(watch)
    }
}

/// A subscriber mailbox created by [`MessageChannel::subscription`]
///
/// Dropping the subscription unsubscribes it.
///
/// [`MessageChannel::subscription`]: crate::channel::MessageChannel::subscription
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::UnboundedReceiver<Arc<Message>>,
}

impl Subscription {
    /// Wait for the next delivered message
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.receiver.recv().await
    }

    /// Take a delivered message if one is already waiting
    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message() -> Arc<Message> {
        Arc::new(Message::new("test", json!(null)))
    }

    #[test]
    fn test_unbounded_delivery_and_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber::unbounded(tx);

        assert_eq!(subscriber.try_deliver(message()), Delivery::Sent);
        assert!(rx.try_recv().is_ok());

        drop(rx);
        assert!(subscriber.is_closed());
        assert_eq!(subscriber.try_deliver(message()), Delivery::Closed);
    }

    #[test]
    fn test_bounded_full() {
        let (tx, _rx) = mpsc::channel(1);
        let subscriber = Subscriber::bounded(tx);

        assert_eq!(subscriber.try_deliver(message()), Delivery::Sent);
        assert_eq!(subscriber.try_deliver(message()), Delivery::Full);
    }

    #[test]
    fn test_unmonitored_has_no_liveness() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber::unbounded(tx).unmonitored();
        assert!(!subscriber.is_monitored());
        assert!(subscriber.liveness().is_none());
    }

    #[tokio::test]
    async fn test_liveness_resolves_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber::unbounded(tx);
        let watch = subscriber.liveness().unwrap();

        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(1), watch)
            .await
            .expect("liveness future should resolve");
    }
}
