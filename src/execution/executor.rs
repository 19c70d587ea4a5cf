//! Step executor - runs a single step's handler behind a fault boundary

use crate::core::{
    context::StepContext,
    error::StepError,
    step::{Step, StepKind},
};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error};

/// Successful output of a step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub data: Value,
    pub warnings: Vec<String>,
}

/// Result of executing a step
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub outcome: Result<StepOutput, StepError>,
    pub duration_ms: u64,
}

/// Executes a single step
///
/// Handler errors, panics and timeouts all come back as a `StepError`; nothing
/// a handler does can unwind into the engine.
#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    /// Applies to steps without their own timeout
    default_timeout: Option<Duration>,
}

impl StepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = Some(default_timeout);
        self
    }

    /// Execute a step against the current payload
    pub async fn execute(&self, step: &Step, data: &Value, ctx: &StepContext) -> ExecutionResult {
        debug!(pipeline = %ctx.pipeline, step = %step.name, "Executing step");

        let started = Instant::now();
        let guarded = AssertUnwindSafe(dispatch(&step.kind, data, &step.options, ctx)).catch_unwind();

        let outcome = match step.timeout.or(self.default_timeout) {
            Some(limit) => match timeout(limit, guarded).await {
                Ok(result) => flatten(result),
                Err(_) => {
                    error!(step = %step.name, timeout_ms = limit.as_millis() as u64, "Step timed out");
                    Err(StepError::TimedOut {
                        timeout_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => flatten(guarded.await),
        };

        ExecutionResult {
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Map a step to its collaborator call
async fn dispatch(kind: &StepKind, data: &Value, options: &Value, ctx: &StepContext) -> Result<StepOutput, StepError> {
    let output = match kind {
        StepKind::Extract(handler) => StepOutput {
            data: handler.extract(options, ctx).await?,
            warnings: Vec::new(),
        },
        StepKind::Transform(handler) => StepOutput {
            data: handler.transform(data, options, ctx).await?,
            warnings: Vec::new(),
        },
        StepKind::Validate(handler) => {
            let (data, warnings) = handler.validate(data, options, ctx).await?.into_parts();
            StepOutput { data, warnings }
        }
        StepKind::Load(handler) => StepOutput {
            data: handler.load(data, options, ctx).await?,
            warnings: Vec::new(),
        },
    };
    Ok(output)
}

fn flatten(result: std::thread::Result<Result<StepOutput, StepError>>) -> Result<StepOutput, StepError> {
    match result {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "Step handler panicked");
            Err(StepError::Panicked { message })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
