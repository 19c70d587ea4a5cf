//! Pipeline execution engine

pub mod engine;
pub mod events;
pub mod executor;

pub use engine::PipelineEngine;
pub use events::{forward_to_channel, EventHandler, EventKind, PipelineEvent};
pub use executor::{ExecutionResult, StepExecutor, StepOutput};
