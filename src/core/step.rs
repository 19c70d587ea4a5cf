//! Step domain model

use crate::core::error::{PipelineError, StepError};
use crate::core::state::StepStatus;
use crate::handlers::{Extractor, Loader, Transformer, Validator};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// The four kinds of step a pipeline can contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Extract,
    Transform,
    Validate,
    Load,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Extract => "extract",
            StepType::Transform => "transform",
            StepType::Validate => "validate",
            StepType::Load => "load",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "extract" => Ok(StepType::Extract),
            "transform" => Ok(StepType::Transform),
            "validate" => Ok(StepType::Validate),
            "load" => Ok(StepType::Load),
            _ => Err(PipelineError::UnknownStepType(s.to_string())),
        }
    }
}

/// A step's handler, tagged by step type
#[derive(Clone)]
pub enum StepKind {
    Extract(Arc<dyn Extractor>),
    Transform(Arc<dyn Transformer>),
    Validate(Arc<dyn Validator>),
    Load(Arc<dyn Loader>),
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::Extract(_) => StepType::Extract,
            StepKind::Transform(_) => StepType::Transform,
            StepKind::Validate(_) => StepType::Validate,
            StepKind::Load(_) => StepType::Load,
        }
    }

    pub fn handler_name(&self) -> &str {
        match self {
            StepKind::Extract(h) => h.name(),
            StepKind::Transform(h) => h.name(),
            StepKind::Validate(h) => h.name(),
            StepKind::Load(h) => h.name(),
        }
    }
}

impl fmt::Debug for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.step_type(), self.handler_name())
    }
}

/// Last outcome of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Output(serde_json::Value),
    Error(StepError),
}

/// A single step in a pipeline
///
/// Steps are value records: every state transition produces a new `Step`
/// that replaces the old one in the pipeline.
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique within a pipeline; `{type}_{handler}` unless overridden
    pub name: String,

    pub kind: StepKind,

    /// Handler options, passed through untouched
    pub options: serde_json::Value,

    /// Optional wall-clock limit for the handler call
    pub timeout: Option<Duration>,

    pub status: StepStatus,

    pub result: Option<StepResult>,

    /// Duration of the last execution in milliseconds
    pub duration_ms: Option<u64>,

    /// Warnings reported by a validator
    pub warnings: Vec<String>,
}

impl Step {
    pub fn new(kind: StepKind, options: serde_json::Value) -> Self {
        Self {
            name: Self::derive_name(&kind),
            kind,
            options,
            timeout: None,
            status: StepStatus::Pending,
            result: None,
            duration_ms: None,
            warnings: Vec::new(),
        }
    }

    /// Default step name for a handler
    pub fn derive_name(kind: &StepKind) -> String {
        format!("{}_{}", kind.step_type(), kind.handler_name())
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }

    pub fn output(&self) -> Option<&serde_json::Value> {
        match &self.result {
            Some(StepResult::Output(value)) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StepError> {
        match &self.result {
            Some(StepResult::Error(err)) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn running(&self) -> Self {
        Self {
            status: StepStatus::Running,
            ..self.clone()
        }
    }

    pub(crate) fn completed(&self, output: serde_json::Value, warnings: Vec<String>, duration_ms: u64) -> Self {
        Self {
            status: StepStatus::Completed,
            result: Some(StepResult::Output(output)),
            duration_ms: Some(duration_ms),
            warnings,
            ..self.clone()
        }
    }

    pub(crate) fn failed(&self, error: StepError, duration_ms: u64) -> Self {
        Self {
            status: StepStatus::Failed,
            result: Some(StepResult::Error(error)),
            duration_ms: Some(duration_ms),
            warnings: Vec::new(),
            ..self.clone()
        }
    }

    /// Back to pending with the previous outcome discarded
    pub(crate) fn pending(&self) -> Self {
        Self {
            status: StepStatus::Pending,
            result: None,
            duration_ms: None,
            warnings: Vec::new(),
            ..self.clone()
        }
    }

    pub(crate) fn skipped(&self) -> Self {
        Self {
            status: StepStatus::Skipped,
            ..self.pending()
        }
    }
}
