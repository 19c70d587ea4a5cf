//! Name to channel lookup with get-or-create semantics

use crate::channel::message_channel::{ChannelOptions, MessageChannel};
use crate::core::config::ChannelConfig;
use crate::telemetry::{self, Telemetry};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Registry of named channels
///
/// Creation happens under a single lock, so two concurrent `get_or_create`
/// calls for the same name always return handles to the same worker.
pub struct ChannelRegistry {
    config: ChannelConfig,
    telemetry: Telemetry,
    channels: Mutex<HashMap<String, MessageChannel>>,
}

impl ChannelRegistry {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            telemetry: telemetry::default_sink(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Use a specific telemetry sink for every channel this registry creates
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Return the channel named `name`, starting it if needed
    pub async fn get_or_create(&self, name: &str) -> MessageChannel {
        let mut channels = self.channels.lock().await;

        if let Some(channel) = channels.get(name) {
            if !channel.is_closed() {
                return channel.clone();
            }
            warn!(channel = %name, "Registered channel had stopped, restarting");
        }

        let settings = self.config.for_channel(name);
        let options = ChannelOptions::default()
            .with_max_queue_size(settings.max_queue_size)
            .with_call_timeout(settings.call_timeout())
            .with_telemetry(self.telemetry.clone());

        let channel = MessageChannel::spawn(name, options);
        channels.insert(name.to_string(), channel.clone());
        debug!(channel = %name, "Channel registered");
        channel
    }

    /// Look up a running channel
    pub async fn get_channel(&self, name: &str) -> Option<MessageChannel> {
        let channels = self.channels.lock().await;
        channels.get(name).filter(|c| !c.is_closed()).cloned()
    }

    /// All running channels, sorted by name
    pub async fn list_channels(&self) -> Vec<(String, MessageChannel)> {
        let channels = self.channels.lock().await;
        let mut listed: Vec<_> = channels
            .iter()
            .filter(|(_, c)| !c.is_closed())
            .map(|(name, c)| (name.clone(), c.clone()))
            .collect();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        listed
    }

    /// Forget a channel; its worker stops once other handles are dropped
    pub async fn remove(&self, name: &str) -> Option<MessageChannel> {
        self.channels.lock().await.remove(name)
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ChannelSettings;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_or_create_returns_same_channel() {
        let registry = ChannelRegistry::default();

        let first = registry.get_or_create("contract.events").await;
        let first_sub = first.subscription().await.unwrap();

        let second = registry.get_or_create("contract.events").await;
        let stats = second.stats().await.unwrap();
        assert_eq!(stats.subscriber_count, 1);
        drop(first_sub);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create() {
        let registry = Arc::new(ChannelRegistry::default());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let channel = registry.get_or_create("shared").await;
                channel.subscription().await.unwrap()
            }));
        }

        let mut subs = Vec::new();
        for task in tasks {
            subs.push(task.await.unwrap());
        }

        assert_eq!(registry.list_channels().await.len(), 1);
        let channel = registry.get_channel("shared").await.unwrap();
        assert_eq!(channel.stats().await.unwrap().subscriber_count, 8);
    }

    #[tokio::test]
    async fn test_get_channel_not_found() {
        let registry = ChannelRegistry::default();
        assert!(registry.get_channel("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_list_channels_sorted() {
        let registry = ChannelRegistry::default();
        registry.get_or_create("b").await;
        registry.get_or_create("a").await;

        let names: Vec<_> = registry
            .list_channels()
            .await
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_overrides_apply() {
        let mut config = ChannelConfig::default();
        config.overrides.insert(
            "tiny".to_string(),
            ChannelSettings {
                max_queue_size: Some(1),
                call_timeout_ms: None,
            },
        );
        let registry = ChannelRegistry::new(config);
        let channel = registry.get_or_create("tiny").await;

        let (a, b) = tokio::join!(
            channel.publish(crate::channel::Message::new("a", serde_json::Value::Null)),
            channel.publish(crate::channel::Message::new("b", serde_json::Value::Null)),
        );
        assert!(a.is_ok());
        assert!(b.is_err());
    }
}
