//! Message channel actor
//!
//! A `MessageChannel` is a handle to a single worker task that exclusively
//! owns the queue and the subscriber set. Every operation is a command sent
//! to the worker's mailbox and answered on a oneshot, so concurrent callers
//! are totally ordered per channel without any shared lock.

use crate::channel::error::{ChannelError, Result};
use crate::channel::message::{Message, Priority};
use crate::channel::queue::MessageQueue;
use crate::channel::stats::ChannelStats;
use crate::channel::subscriber::{Delivery, Subscriber, SubscriberId, Subscription};
use crate::telemetry::{self, Measurement, Telemetry};
use chrono::{DateTime, Utc};
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Default capacity of a channel queue
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Default time a caller waits for the worker to answer
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for a new channel
#[derive(Clone)]
pub struct ChannelOptions {
    pub max_queue_size: usize,
    pub call_timeout: Duration,
    pub telemetry: Telemetry,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            telemetry: telemetry::default_sink(),
        }
    }
}

impl ChannelOptions {
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }
}

type Predicate = Box<dyn FnMut(&Message) -> bool + Send>;

enum Command {
    Publish {
        message: Message,
        priority: Priority,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Subscribe {
        subscriber: Subscriber,
        reply: oneshot::Sender<SubscriberId>,
    },
    Unsubscribe {
        id: SubscriberId,
        reply: oneshot::Sender<bool>,
    },
    QueueSize {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<ChannelStats>,
    },
    Drain {
        reply: oneshot::Sender<Vec<Message>>,
    },
    Filter {
        predicate: Predicate,
        reply: oneshot::Sender<usize>,
    },
    /// Self-scheduled delivery round
    Deliver,
}

/// Handle to a named channel
///
/// Cloning is cheap. The worker stops once every handle is dropped; queued
/// messages are lost at that point.
#[derive(Clone)]
pub struct MessageChannel {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Command>,
    call_timeout: Duration,
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MessageChannel {
    /// Spawn a channel worker on the current tokio runtime
    pub fn spawn(name: impl Into<String>, options: ChannelOptions) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = ChannelWorker::new(name.clone(), &options, tx.downgrade());
        tokio::spawn(worker.run(rx));

        info!(
            channel = %name,
            max_queue_size = options.max_queue_size,
            "Channel started"
        );

        Self {
            name,
            tx,
            call_timeout: options.call_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// A handle to the same channel with a different call timeout
    pub fn with_call_timeout(&self, call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            ..self.clone()
        }
    }

    /// Whether the worker has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Publish using the message's priority header
    pub async fn publish(&self, message: Message) -> Result<()> {
        let priority = message.priority();
        self.publish_with_priority(message, priority).await
    }

    /// Publish into an explicit priority tier.
    ///
    /// Returns [`ChannelError::QueueFull`] without queueing when the channel is
    /// at capacity.
    pub async fn publish_with_priority(&self, message: Message, priority: Priority) -> Result<()> {
        self.call(|reply| Command::Publish {
            message,
            priority,
            reply: Some(reply),
        })
        .await?
    }

    /// Publish without waiting for the outcome.
    ///
    /// A rejection is still counted in `dropped`; only a stopped worker is
    /// reported here.
    pub fn publish_nowait(&self, message: Message) -> Result<()> {
        let priority = message.priority();
        self.send(Command::Publish {
            message,
            priority,
            reply: None,
        })
    }

    pub async fn subscribe(&self, subscriber: Subscriber) -> Result<SubscriberId> {
        self.call(|reply| Command::Subscribe { subscriber, reply })
            .await
    }

    /// Subscribe a fresh unbounded mailbox
    pub async fn subscription(&self) -> Result<Subscription> {
        let (tx, receiver) = mpsc::unbounded_channel();
        let id = self.subscribe(Subscriber::unbounded(tx)).await?;
        Ok(Subscription { id, receiver })
    }

    /// Returns whether the subscriber was registered
    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<bool> {
        self.call(|reply| Command::Unsubscribe { id, reply }).await
    }

    pub async fn queue_size(&self) -> Result<usize> {
        self.call(|reply| Command::QueueSize { reply }).await
    }

    pub async fn stats(&self) -> Result<ChannelStats> {
        self.call(|reply| Command::Stats { reply }).await
    }

    /// Remove and return every queued message in delivery order
    pub async fn drain(&self) -> Result<Vec<Message>> {
        self.call(|reply| Command::Drain { reply }).await
    }

    /// Keep only queued messages matching `predicate`; returns how many were removed
    pub async fn filter<F>(&self, predicate: F) -> Result<usize>
    where
        F: FnMut(&Message) -> bool + Send + 'static,
    {
        self.call(|reply| Command::Filter {
            predicate: Box::new(predicate),
            reply,
        })
        .await
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| ChannelError::Closed(self.name.to_string()))
    }

    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply))?;

        match tokio::time::timeout(self.call_timeout, response).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ChannelError::Closed(self.name.to_string())),
            Err(_) => Err(ChannelError::Timeout {
                channel: self.name.to_string(),
                timeout: self.call_timeout,
            }),
        }
    }
}

struct Registered {
    subscriber: Subscriber,
    monitor: Option<AbortHandle>,
}

type Monitor = Abortable<BoxFuture<'static, SubscriberId>>;

struct ChannelWorker {
    name: Arc<str>,
    queue: MessageQueue,
    subscribers: BTreeMap<SubscriberId, Registered>,
    next_id: u64,
    max_queue_size: usize,
    published: u64,
    delivered: u64,
    dropped: u64,
    unconsumed: u64,
    lagged: u64,
    started_at: DateTime<Utc>,
    started: Instant,
    delivery_scheduled: bool,
    mailbox: mpsc::WeakUnboundedSender<Command>,
    telemetry: Telemetry,
}

impl ChannelWorker {
    fn new(
        name: Arc<str>,
        options: &ChannelOptions,
        mailbox: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            name,
            queue: MessageQueue::new(),
            subscribers: BTreeMap::new(),
            next_id: 1,
            max_queue_size: options.max_queue_size,
            published: 0,
            delivered: 0,
            dropped: 0,
            unconsumed: 0,
            lagged: 0,
            started_at: Utc::now(),
            started: Instant::now(),
            delivery_scheduled: false,
            mailbox,
            telemetry: options.telemetry.clone(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut monitors: FuturesUnordered<Monitor> = FuturesUnordered::new();

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command, &mut monitors),
                    None => break,
                },
                Some(down) = monitors.next(), if !monitors.is_empty() => {
                    if let Ok(id) = down {
                        self.subscriber_down(id);
                    }
                }
            }
        }

        if !self.queue.is_empty() {
            warn!(
                channel = %self.name,
                lost = self.queue.len(),
                "Channel stopped with undelivered messages"
            );
        }
        debug!(channel = %self.name, "Channel worker stopped");
    }

    fn handle(&mut self, command: Command, monitors: &mut FuturesUnordered<Monitor>) {
        match command {
            Command::Publish {
                message,
                priority,
                reply,
            } => {
                let result = self.publish(message, priority);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::Subscribe { subscriber, reply } => {
                let id = self.subscribe(subscriber, monitors);
                let _ = reply.send(id);
            }
            Command::Unsubscribe { id, reply } => {
                let removed = self.remove_subscriber(id);
                if removed {
                    debug!(channel = %self.name, subscriber = %id, "Subscriber removed");
                }
                let _ = reply.send(removed);
            }
            Command::QueueSize { reply } => {
                let _ = reply.send(self.queue.len());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Drain { reply } => {
                let _ = reply.send(self.queue.drain());
            }
            Command::Filter {
                mut predicate,
                reply,
            } => {
                let removed = self.queue.filter(|m| predicate(m));
                let _ = reply.send(removed);
            }
            Command::Deliver => self.deliver_round(),
        }
    }

    fn publish(&mut self, message: Message, priority: Priority) -> Result<()> {
        let queue_size = self.queue.len();
        if queue_size >= self.max_queue_size {
            self.dropped += 1;
            warn!(
                channel = %self.name,
                queue_size,
                message_type = %message.message_type,
                "Queue full, rejecting message"
            );
            self.telemetry.record(
                &Measurement::new("channel.backpressure", queue_size as f64)
                    .tag("channel", self.name.as_ref())
                    .tag("message_type", message.message_type.as_str())
                    .tag_opt("tenant", message.tenant_id()),
            );
            return Err(ChannelError::QueueFull {
                channel: self.name.to_string(),
                max_queue_size: self.max_queue_size,
            });
        }

        debug!(
            channel = %self.name,
            message_id = %message.id,
            %priority,
            "Message accepted"
        );
        self.queue.push(message, priority);
        self.published += 1;
        self.schedule_delivery();
        Ok(())
    }

    fn subscribe(
        &mut self,
        subscriber: Subscriber,
        monitors: &mut FuturesUnordered<Monitor>,
    ) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let monitor = subscriber.liveness().map(|closed| {
            let (handle, registration) = AbortHandle::new_pair();
            monitors.push(Abortable::new(closed.map(move |_| id).boxed(), registration));
            handle
        });

        debug!(
            channel = %self.name,
            subscriber = %id,
            monitored = monitor.is_some(),
            "Subscriber added"
        );
        self.subscribers.insert(
            id,
            Registered {
                subscriber,
                monitor,
            },
        );
        // Messages may have piled up while nobody was listening
        self.schedule_delivery();
        id
    }

    fn remove_subscriber(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.remove(&id) {
            Some(registered) => {
                if let Some(monitor) = registered.monitor {
                    monitor.abort();
                }
                true
            }
            None => false,
        }
    }

    fn subscriber_down(&mut self, id: SubscriberId) {
        if self.remove_subscriber(id) {
            info!(channel = %self.name, subscriber = %id, "Subscriber terminated, removed");
            self.telemetry.record(
                &Measurement::new("channel.subscriber.down", 1.0)
                    .tag("channel", self.name.as_ref()),
            );
        }
    }

    fn schedule_delivery(&mut self) {
        if self.delivery_scheduled || self.queue.is_empty() {
            return;
        }
        if let Some(mailbox) = self.mailbox.upgrade() {
            if mailbox.send(Command::Deliver).is_ok() {
                self.delivery_scheduled = true;
            }
        }
    }

    /// Pop one message and fan it out, then reschedule while work remains
    fn deliver_round(&mut self) {
        self.delivery_scheduled = false;

        let Some(message) = self.queue.pop() else {
            return;
        };

        if self.subscribers.is_empty() {
            self.unconsumed += 1;
            debug!(
                channel = %self.name,
                message_id = %message.id,
                "No subscribers, message discarded"
            );
        } else {
            let message = Arc::new(message);
            let mut closed = Vec::new();

            for (id, registered) in &self.subscribers {
                match registered.subscriber.try_deliver(Arc::clone(&message)) {
                    Delivery::Sent => self.delivered += 1,
                    Delivery::Full => {
                        self.lagged += 1;
                        warn!(channel = %self.name, subscriber = %id, "Subscriber mailbox full, message skipped");
                    }
                    Delivery::Closed => closed.push(*id),
                }
            }

            for id in closed {
                self.subscriber_down(id);
            }
        }

        self.schedule_delivery();
    }

    fn stats(&self) -> ChannelStats {
        ChannelStats {
            name: self.name.to_string(),
            published: self.published,
            delivered: self.delivered,
            dropped: self.dropped,
            unconsumed: self.unconsumed,
            lagged: self.lagged,
            queue_size: self.queue.len(),
            subscriber_count: self.subscribers.len(),
            started_at: self.started_at,
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;
    use serde_json::json;

    fn msg(kind: &str) -> Message {
        Message::new(kind, json!({ "kind": kind }))
    }

    fn channel(max_queue_size: usize) -> MessageChannel {
        MessageChannel::spawn(
            "test",
            ChannelOptions::default().with_max_queue_size(max_queue_size),
        )
    }

    #[tokio::test]
    async fn test_publish_delivers_to_subscriber() {
        let channel = channel(10);
        let mut sub = channel.subscription().await.unwrap();

        channel.publish(msg("contract.created")).await.unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.message_type, "contract.created");

        let stats = channel.stats().await.unwrap();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.subscriber_count, 1);
    }

    #[tokio::test]
    async fn test_backpressure_rejects_when_full() {
        let sink = Arc::new(MemorySink::new());
        let channel = MessageChannel::spawn(
            "bp",
            ChannelOptions::default()
                .with_max_queue_size(1)
                .with_telemetry(sink.clone()),
        );

        // Both commands reach the mailbox before the first delivery round runs
        let (first, second) = tokio::join!(channel.publish(msg("a")), channel.publish(msg("b")));

        assert!(first.is_ok());
        assert!(matches!(second, Err(ChannelError::QueueFull { max_queue_size: 1, .. })));

        let stats = channel.stats().await.unwrap();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(sink.named("channel.backpressure").len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_follows_priority() {
        let channel = channel(10);
        let mut sub = channel.subscription().await.unwrap();

        let (a, b, c) = tokio::join!(
            channel.publish_with_priority(msg("a"), Priority::Normal),
            channel.publish_with_priority(msg("b"), Priority::High),
            channel.publish_with_priority(msg("c"), Priority::Low),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(sub.recv().await.unwrap().message_type.clone());
        }
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_zero_subscribers_counts_unconsumed() {
        let channel = channel(10);
        channel.publish(msg("lonely")).await.unwrap();

        let stats = channel.stats().await.unwrap();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.unconsumed, 1);
        assert_eq!(stats.queue_size, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let channel = channel(10);
        let sub = channel.subscription().await.unwrap();

        assert!(channel.unsubscribe(sub.id).await.unwrap());
        assert!(!channel.unsubscribe(sub.id).await.unwrap());
        assert_eq!(channel.stats().await.unwrap().subscriber_count, 0);
    }

    #[tokio::test]
    async fn test_drain_returns_priority_order() {
        let channel = channel(10);

        let (_, _, _, drained) = tokio::join!(
            channel.publish_with_priority(msg("a"), Priority::Normal),
            channel.publish_with_priority(msg("b"), Priority::High),
            channel.publish_with_priority(msg("c"), Priority::Low),
            channel.drain(),
        );

        let types: Vec<_> = drained.unwrap().into_iter().map(|m| m.message_type).collect();
        assert_eq!(types, vec!["b", "a", "c"]);
        assert_eq!(channel.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_filter_queued_messages() {
        let channel = channel(10);

        let (_, _, removed, size) = tokio::join!(
            channel.publish(msg("keep").with_tenant("acme")),
            channel.publish(msg("purge").with_tenant("globex")),
            channel.filter(|m| m.tenant_id() != Some("globex")),
            channel.queue_size(),
        );

        assert_eq!(removed.unwrap(), 1);
        assert_eq!(size.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_publish_nowait_is_counted() {
        let channel = channel(10);
        let mut sub = channel.subscription().await.unwrap();

        channel.publish_nowait(msg("fire")).unwrap();
        assert_eq!(sub.recv().await.unwrap().message_type, "fire");
        assert_eq!(channel.stats().await.unwrap().published, 1);
    }
}
