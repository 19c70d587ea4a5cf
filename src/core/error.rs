//! Error taxonomy for pipeline execution
//!
//! - [`HandlerError`]: a collaborator reported a domain failure.
//! - [`StepError`]: what a step failure is normalized into, including
//!   panics and timeouts caught at the step boundary.
//! - [`SessionError`]: the staging session service failed.
//! - [`PipelineError`]: what the engine hands back to callers.

use crate::core::state::PipelineStatus;
use crate::core::step::StepType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure reported by an extractor, transformer, validator or loader
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{reason}")]
pub struct HandlerError {
    pub reason: String,

    /// Optional structured detail (offending rows, field names, ...)
    pub details: Option<serde_json::Value>,
}

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

/// A step failure in its normalized shape
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("handler panicked: {message}")]
    Panicked { message: String },

    #[error("handler timed out after {timeout_ms} ms")]
    TimedOut { timeout_ms: u64 },
}

impl StepError {
    /// Short machine-readable reason tag
    pub fn tag(&self) -> &'static str {
        match self {
            StepError::Handler(_) => "handler_error",
            StepError::Panicked { .. } => "panic",
            StepError::TimedOut { .. } => "timeout",
        }
    }
}

/// Which session operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOperation {
    Create,
    Commit,
    Rollback,
}

impl fmt::Display for SessionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionOperation::Create => "create",
            SessionOperation::Commit => "commit",
            SessionOperation::Rollback => "rollback",
        })
    }
}

/// Infrastructure failure of the staging session service
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("session {operation} failed: {reason}")]
pub struct SessionError {
    pub operation: SessionOperation,
    pub reason: String,
}

impl SessionError {
    pub fn new(operation: SessionOperation, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

/// An entry in a pipeline's error history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PipelineFailure {
    Step { step: String, error: StepError },
    Session { error: SessionError },
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineFailure::Step { step, error } => write!(f, "step '{}': {}", step, error),
            PipelineFailure::Session { error } => write!(f, "{}", error),
        }
    }
}

/// Errors returned by the pipeline engine and configuration resolution
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// A step failed; the pipeline halted and its session was rolled back
    #[error("step '{step}' failed: {error}")]
    StepFailed { step: String, error: StepError },

    #[error("could not open staging session: {0}")]
    SessionCreate(SessionError),

    #[error("could not commit staging session: {0}")]
    Commit(SessionError),

    /// Data may be inconsistent; needs manual intervention
    #[error("rollback failed, manual intervention required: {0}")]
    RollbackFailed(SessionError),

    #[error("cannot {operation} pipeline '{pipeline}' in status {status}")]
    InvalidState {
        pipeline: String,
        operation: &'static str,
        status: PipelineStatus,
    },

    #[error("unknown step type '{0}'")]
    UnknownStepType(String),

    #[error("no {kind} handler registered as '{name}'")]
    UnknownHandler { kind: StepType, name: String },

    #[error("unknown pipeline '{0}'")]
    UnknownPipeline(String),
}

impl PipelineError {
    /// Fatal errors must be escalated rather than retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::RollbackFailed(_))
    }

    /// Infrastructure errors come from the session service
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            PipelineError::SessionCreate(_) | PipelineError::Commit(_) | PipelineError::RollbackFailed(_)
        )
    }

    /// Protocol errors are misuse of the API or structural misconfiguration
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidState { .. }
                | PipelineError::UnknownStepType(_)
                | PipelineError::UnknownHandler { .. }
                | PipelineError::UnknownPipeline(_)
        )
    }

    /// Diagnostic tag
    pub fn tag(&self) -> &'static str {
        match self {
            PipelineError::StepFailed { .. } => "step_failed",
            PipelineError::SessionCreate(_) => "session_create_failed",
            PipelineError::Commit(_) => "commit_failed",
            PipelineError::RollbackFailed(_) => "rollback_failed",
            PipelineError::InvalidState { .. } => "invalid_state",
            PipelineError::UnknownStepType(_) => "unknown_step_type",
            PipelineError::UnknownHandler { .. } => "unknown_handler",
            PipelineError::UnknownPipeline(_) => "unknown_pipeline",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let rollback = PipelineError::RollbackFailed(SessionError::new(SessionOperation::Rollback, "db down"));
        assert!(rollback.is_fatal());
        assert!(rollback.is_infrastructure());
        assert_eq!(rollback.tag(), "rollback_failed");

        let step = PipelineError::StepFailed {
            step: "transform_normalize".into(),
            error: HandlerError::new("bad row").into(),
        };
        assert!(!step.is_fatal());
        assert!(!step.is_infrastructure());
        assert!(step.to_string().contains("bad row"));

        let invalid = PipelineError::InvalidState {
            pipeline: "import".into(),
            operation: "resume",
            status: PipelineStatus::Completed,
        };
        assert!(invalid.is_protocol());
        assert_eq!(invalid.tag(), "invalid_state");
        assert!(invalid.to_string().contains("completed"));
    }

    #[test]
    fn test_step_error_tags() {
        assert_eq!(StepError::from(HandlerError::new("x")).tag(), "handler_error");
        assert_eq!(StepError::Panicked { message: "boom".into() }.tag(), "panic");
        assert_eq!(StepError::TimedOut { timeout_ms: 10 }.tag(), "timeout");
    }

    #[test]
    fn test_handler_error_from_anyhow() {
        let err: HandlerError = anyhow::anyhow!("inner").context("outer").into();
        assert_eq!(err.reason, "outer: inner");
    }

    #[test]
    fn test_failure_display() {
        let failure = PipelineFailure::Session {
            error: SessionError::new(SessionOperation::Commit, "deadlock"),
        };
        assert_eq!(failure.to_string(), "session commit failed: deadlock");
    }
}
