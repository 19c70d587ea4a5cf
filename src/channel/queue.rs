//! Three-tier priority queue
//!
//! Pop order is high, then normal, then low. Insertion order is kept
//! within a tier.

use crate::channel::message::{Message, Priority};
use std::collections::VecDeque;

/// Priority-ordered message buffer
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    high: VecDeque<Message>,
    normal: VecDeque<Message>,
    low: VecDeque<Message>,
    size: usize,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the tier matching `priority`
    pub fn push(&mut self, message: Message, priority: Priority) {
        self.tier_mut(priority).push_back(message);
        self.size += 1;
    }

    /// Remove the oldest message of the highest non-empty tier
    pub fn pop(&mut self) -> Option<Message> {
        let message = self
            .high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())?;
        self.size -= 1;
        Some(message)
    }

    /// The message `pop` would return, without removing it
    pub fn peek(&self) -> Option<&Message> {
        self.high
            .front()
            .or_else(|| self.normal.front())
            .or_else(|| self.low.front())
    }

    /// Pop everything, in delivery order
    pub fn drain(&mut self) -> Vec<Message> {
        let mut drained = Vec::with_capacity(self.size);
        drained.extend(self.high.drain(..));
        drained.extend(self.normal.drain(..));
        drained.extend(self.low.drain(..));
        self.size = 0;
        drained
    }

    /// Keep only messages matching `predicate`; returns how many were removed
    pub fn filter<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Message) -> bool,
    {
        self.high.retain(&mut predicate);
        self.normal.retain(&mut predicate);
        self.low.retain(&mut predicate);

        let before = self.size;
        self.size = self.high.len() + self.normal.len() + self.low.len();
        before - self.size
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of messages waiting in one tier
    pub fn tier_len(&self, priority: Priority) -> usize {
        match priority {
            Priority::High => self.high.len(),
            Priority::Normal => self.normal.len(),
            Priority::Low => self.low.len(),
        }
    }

    fn tier_mut(&mut self, priority: Priority) -> &mut VecDeque<Message> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(kind: &str) -> Message {
        Message::new(kind, json!(null))
    }

    fn types(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.message_type.as_str()).collect()
    }

    #[test]
    fn test_pop_order_across_tiers() {
        let mut queue = MessageQueue::new();
        queue.push(msg("a"), Priority::Normal);
        queue.push(msg("b"), Priority::High);
        queue.push(msg("c"), Priority::Low);

        assert_eq!(queue.pop().unwrap().message_type, "b");
        assert_eq!(queue.pop().unwrap().message_type, "a");
        assert_eq!(queue.pop().unwrap().message_type, "c");
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_within_tier() {
        let mut queue = MessageQueue::new();
        for name in ["n1", "n2", "n3"] {
            queue.push(msg(name), Priority::Normal);
        }
        queue.push(msg("h1"), Priority::High);
        queue.push(msg("h2"), Priority::High);

        assert_eq!(types(&queue.drain()), vec!["h1", "h2", "n1", "n2", "n3"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut queue = MessageQueue::new();
        assert!(queue.peek().is_none());

        queue.push(msg("low"), Priority::Low);
        queue.push(msg("normal"), Priority::Normal);

        assert_eq!(queue.peek().unwrap().message_type, "normal");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().message_type, "normal");
    }

    #[test]
    fn test_size_tracks_tiers() {
        let mut queue = MessageQueue::new();
        queue.push(msg("a"), Priority::High);
        queue.push(msg("b"), Priority::Low);
        queue.push(msg("c"), Priority::Low);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.tier_len(Priority::High), 1);
        assert_eq!(queue.tier_len(Priority::Normal), 0);
        assert_eq!(queue.tier_len(Priority::Low), 2);

        queue.pop();
        assert_eq!(
            queue.len(),
            queue.tier_len(Priority::High) + queue.tier_len(Priority::Normal) + queue.tier_len(Priority::Low)
        );
    }

    #[test]
    fn test_filter_recomputes_size_and_keeps_order() {
        let mut queue = MessageQueue::new();
        queue.push(msg("keep-1").with_tenant("acme"), Priority::Normal);
        queue.push(msg("drop-1").with_tenant("globex"), Priority::Normal);
        queue.push(msg("keep-2").with_tenant("acme"), Priority::Low);
        queue.push(msg("drop-2").with_tenant("globex"), Priority::High);

        let removed = queue.filter(|m| m.tenant_id() == Some("acme"));

        assert_eq!(removed, 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(types(&queue.drain()), vec!["keep-1", "keep-2"]);
    }

    #[test]
    fn test_drain_empty() {
        let mut queue = MessageQueue::new();
        assert!(queue.drain().is_empty());
        assert_eq!(queue.len(), 0);
    }
}
