//! Message envelope carried by channels

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Header holding the delivery priority
pub const PRIORITY_HEADER: &str = "priority";

/// Header holding the tenant the message belongs to
pub const TENANT_HEADER: &str = "tenant_id";

/// Delivery priority tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// A message flowing through a channel
///
/// The payload is opaque to the channel; only the routing headers
/// (priority, tenant) are ever inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: Uuid,

    /// Domain type, e.g. `contract.created`
    pub message_type: String,

    /// Opaque payload
    pub payload: serde_json::Value,

    /// Routing headers
    pub headers: HashMap<String, String>,

    /// Correlates messages belonging to one conversation or run
    pub correlation_id: Option<String>,

    /// When the message was created
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message with a fresh ID and no headers
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message_type.into(),
            payload,
            headers: HashMap::new(),
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(self, priority: Priority) -> Self {
        self.with_header(PRIORITY_HEADER, priority.as_str())
    }

    pub fn with_tenant(self, tenant_id: impl Into<String>) -> Self {
        self.with_header(TENANT_HEADER, tenant_id)
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Priority from the routing header, `Normal` when absent or unparseable
    pub fn priority(&self) -> Priority {
        self.header(PRIORITY_HEADER)
            .and_then(|p| p.parse().ok())
            .unwrap_or_default()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.header(TENANT_HEADER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_defaults_to_normal() {
        let message = Message::new("contract.created", json!({"id": 1}));
        assert_eq!(message.priority(), Priority::Normal);

        let message = message.with_header(PRIORITY_HEADER, "urgent");
        assert_eq!(message.priority(), Priority::Normal);
    }

    #[test]
    fn test_priority_header_roundtrip() {
        let message = Message::new("contract.created", json!(null)).with_priority(Priority::High);
        assert_eq!(message.header(PRIORITY_HEADER), Some("high"));
        assert_eq!(message.priority(), Priority::High);
        assert_eq!("LOW".parse::<Priority>(), Ok(Priority::Low));
    }

    #[test]
    fn test_tenant_and_correlation() {
        let message = Message::new("customer.updated", json!({}))
            .with_tenant("acme")
            .with_correlation_id("run-42");
        assert_eq!(message.tenant_id(), Some("acme"));
        assert_eq!(message.correlation_id.as_deref(), Some("run-42"));
    }
}
