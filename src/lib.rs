//! integration-core - pipeline orchestration and priority message channels
//! for multi-tenant data integration

pub mod channel;
pub mod cli;
pub mod core;
pub mod execution;
pub mod handlers;
pub mod sessions;
pub mod telemetry;

// Re-export commonly used types
pub use channel::{ChannelError, ChannelRegistry, Message, MessageChannel, Priority, Subscriber, Subscription};
pub use core::config::{IntegrationConfig, RetryPolicy};
pub use core::{
    HandlerError, Pipeline, PipelineError, PipelineStatus, Progress, RunContext, Step, StepContext, StepError,
    StepKind, StepStatus,
};
pub use execution::{forward_to_channel, PipelineEngine, PipelineEvent};
pub use handlers::{Extractor, HandlerRegistry, Loader, Transformer, ValidationOutcome, Validator};
pub use sessions::{InMemorySessionService, SessionId, SessionService};
