//! Contracts for the collaborators that do a step's actual work
//!
//! The engine only sequences steps. Reading files, normalizing fields and
//! writing rows are done by implementations of these traits, registered by
//! name in a [`HandlerRegistry`] when pipelines come from configuration.

pub mod registry;

pub use registry::HandlerRegistry;

use crate::core::context::StepContext;
use crate::core::error::HandlerError;
use async_trait::async_trait;
use serde_json::Value;

/// Produces the initial records of a pipeline
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, options: &Value, ctx: &StepContext) -> Result<Value, HandlerError>;
}

/// Turns the current payload into a new one
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    async fn transform(&self, data: &Value, options: &Value, ctx: &StepContext) -> Result<Value, HandlerError>;
}

/// Result of a successful validation
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid(Value),
    ValidWithWarnings { data: Value, warnings: Vec<String> },
}

impl ValidationOutcome {
    /// Split into the payload and any warnings
    pub fn into_parts(self) -> (Value, Vec<String>) {
        match self {
            ValidationOutcome::Valid(data) => (data, Vec::new()),
            ValidationOutcome::ValidWithWarnings { data, warnings } => (data, warnings),
        }
    }
}

/// Checks the payload; warnings do not fail the step
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, data: &Value, options: &Value, ctx: &StepContext)
        -> Result<ValidationOutcome, HandlerError>;
}

/// Writes the payload into the staging session named in the context
#[async_trait]
pub trait Loader: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, data: &Value, options: &Value, ctx: &StepContext) -> Result<Value, HandlerError>;
}
