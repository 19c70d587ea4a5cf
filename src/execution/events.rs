//! Pipeline lifecycle events
//!
//! The engine reports every transition as a [`PipelineEvent`]. Events reach
//! registered handlers and are mirrored as telemetry measurements. The
//! [`forward_to_channel`] handler publishes them onto a message channel, which
//! is the only link between pipelines and channels.

use crate::channel::{Message, MessageChannel, Priority};
use crate::core::pipeline::Pipeline;
use crate::core::state::{PipelineStatus, Progress};
use crate::telemetry::Measurement;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    PipelineStarted {
        total_steps: usize,
    },
    StepStarted {
        step: String,
        index: usize,
    },
    StepCompleted {
        step: String,
        duration_ms: u64,
        progress: Progress,
    },
    StepFailed {
        step: String,
        duration_ms: u64,
        error: String,
    },
    PipelineCompleted {
        elapsed_ms: u64,
    },
    PipelineFailed {
        status: PipelineStatus,
        elapsed_ms: u64,
        error: String,
    },
    RolledBack,
    RollbackFailed {
        error: String,
    },
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PipelineStarted { .. } => "started",
            EventKind::StepStarted { .. } => "step_started",
            EventKind::StepCompleted { .. } => "step_completed",
            EventKind::StepFailed { .. } => "step_failed",
            EventKind::PipelineCompleted { .. } => "completed",
            EventKind::PipelineFailed { .. } => "failed",
            EventKind::RolledBack => "rolled_back",
            EventKind::RollbackFailed { .. } => "rollback_failed",
            EventKind::RetryScheduled { .. } => "retry_scheduled",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventKind::StepFailed { .. } | EventKind::PipelineFailed { .. } | EventKind::RollbackFailed { .. }
        )
    }
}

/// An event from one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineEvent {
    pub run_id: Uuid,
    pub pipeline: String,
    pub tenant_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl PipelineEvent {
    pub fn new(pipeline: &Pipeline, kind: EventKind) -> Self {
        Self {
            run_id: pipeline.run_id,
            pipeline: pipeline.name.clone(),
            tenant_id: pipeline.tenant_id.clone(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Message type used when the event is published, e.g. `pipeline.step_failed`
    pub fn message_type(&self) -> String {
        format!("pipeline.{}", self.kind.name())
    }

    /// Telemetry measurement for this event, if it has one
    pub fn measurement(&self) -> Option<Measurement> {
        let measurement = match &self.kind {
            EventKind::PipelineStarted { total_steps } => {
                Measurement::new("pipeline.start", *total_steps as f64)
            }
            EventKind::StepStarted { step, .. } => Measurement::new("pipeline.step.start", 1.0).tag("step", step),
            EventKind::StepCompleted { step, duration_ms, .. } => {
                Measurement::new("pipeline.step.stop", *duration_ms as f64).tag("step", step)
            }
            EventKind::StepFailed { step, duration_ms, .. } => {
                Measurement::new("pipeline.step.failure", *duration_ms as f64).tag("step", step)
            }
            EventKind::PipelineCompleted { elapsed_ms } => {
                Measurement::new("pipeline.stop", *elapsed_ms as f64).tag("status", PipelineStatus::Completed.as_str())
            }
            EventKind::PipelineFailed { status, elapsed_ms, .. } => {
                Measurement::new("pipeline.failure", *elapsed_ms as f64).tag("status", status.as_str())
            }
            EventKind::RetryScheduled { attempt, delay_ms } => {
                Measurement::new("pipeline.retry", *delay_ms as f64).tag("attempt", attempt.to_string())
            }
            EventKind::RolledBack | EventKind::RollbackFailed { .. } => return None,
        };

        Some(
            measurement
                .tag("pipeline", &self.pipeline)
                .tag_opt("tenant", self.tenant_id.as_deref()),
        )
    }

    /// Wrap the event in a channel message
    pub fn to_message(&self) -> Message {
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let priority = if self.kind.is_failure() {
            Priority::High
        } else {
            Priority::Normal
        };

        let message = Message::new(self.message_type(), payload)
            .with_priority(priority)
            .with_correlation_id(self.run_id.to_string());

        match &self.tenant_id {
            Some(tenant) => message.with_tenant(tenant),
            None => message,
        }
    }
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// An event handler that publishes every event onto `channel` without waiting
///
/// A full channel drops the event and logs a warning; the pipeline is never
/// slowed down by its observers.
pub fn forward_to_channel(channel: MessageChannel) -> impl Fn(PipelineEvent) + Send + Sync + 'static {
    move |event: PipelineEvent| {
        if let Err(err) = channel.publish_nowait(event.to_message()) {
            warn!(
                channel = %channel.name(),
                pipeline = %event.pipeline,
                event = event.kind.name(),
                "Could not forward pipeline event: {}",
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{message::TENANT_HEADER, ChannelOptions};

    fn event(kind: EventKind) -> PipelineEvent {
        PipelineEvent::new(&Pipeline::new("import").with_tenant("acme"), kind)
    }

    #[test]
    fn test_measurement_names_and_tags() {
        let m = event(EventKind::StepCompleted {
            step: "extract_csv".into(),
            duration_ms: 42,
            progress: Pipeline::new("import").progress(),
        })
        .measurement()
        .unwrap();

        assert_eq!(m.name, "pipeline.step.stop");
        assert_eq!(m.value, 42.0);
        assert_eq!(m.tags["pipeline"], "import");
        assert_eq!(m.tags["tenant"], "acme");
        assert_eq!(m.tags["step"], "extract_csv");

        let failed = event(EventKind::PipelineFailed {
            status: PipelineStatus::RolledBack,
            elapsed_ms: 7,
            error: "boom".into(),
        })
        .measurement()
        .unwrap();
        assert_eq!(failed.name, "pipeline.failure");
        assert_eq!(failed.tags["status"], "rolled_back");

        assert!(event(EventKind::RolledBack).measurement().is_none());
    }

    #[test]
    fn test_to_message() {
        let ev = event(EventKind::StepFailed {
            step: "load_db".into(),
            duration_ms: 3,
            error: "constraint violation".into(),
        });
        let message = ev.to_message();

        assert_eq!(message.message_type, "pipeline.step_failed");
        assert_eq!(message.priority(), Priority::High);
        assert_eq!(message.correlation_id, Some(ev.run_id.to_string()));
        assert_eq!(message.header(TENANT_HEADER), Some("acme"));
        assert_eq!(message.payload["event"], "step_failed");
        assert_eq!(message.payload["step"], "load_db");
        assert_eq!(message.payload["pipeline"], "import");

        let started = event(EventKind::PipelineStarted { total_steps: 2 }).to_message();
        assert_eq!(started.priority(), Priority::Normal);
    }

    #[tokio::test]
    async fn test_forward_to_channel() {
        let channel = MessageChannel::spawn("pipeline.events", ChannelOptions::default());
        let mut sub = channel.subscription().await.unwrap();

        let handler = forward_to_channel(channel.clone());
        handler(event(EventKind::PipelineStarted { total_steps: 1 }));
        handler(event(EventKind::PipelineCompleted { elapsed_ms: 5 }));

        assert_eq!(sub.recv().await.unwrap().message_type, "pipeline.started");
        assert_eq!(sub.recv().await.unwrap().message_type, "pipeline.completed");
        assert_eq!(channel.stats().await.unwrap().published, 2);
    }
}
