//! Pipeline domain model

use crate::core::error::PipelineFailure;
use crate::core::state::{PipelineStatus, Progress, StepStatus};
use crate::core::step::{Step, StepKind, StepType};
use crate::handlers::{Extractor, Loader, Transformer, Validator};
use crate::sessions::SessionId;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// An ordered sequence of steps plus the state of its latest run
///
/// Built with the builder methods, then mutated only by the engine's
/// `run`, `resume` and `rollback`.
///
/// A `completed` pipeline has every step done: `completed`, or `skipped`
/// through [`Pipeline::skip_step`]. Skipped steps never run and pass `data`
/// through unchanged.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,

    /// Identifies one pipeline instance across retries and resumes
    pub run_id: Uuid,

    /// Staging session of the current run
    pub session_id: Option<SessionId>,

    pub tenant_id: Option<String>,

    pub steps: Vec<Step>,

    pub status: PipelineStatus,

    /// Index of the step executing or last executed
    pub current_step: usize,

    /// Payload threaded from step to step
    pub data: Value,

    /// Most recent first
    pub errors: Vec<PipelineFailure>,

    pub metadata: HashMap<String, Value>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_id: Uuid::new_v4(),
            session_id: None,
            tenant_id: None,
            steps: Vec::new(),
            status: PipelineStatus::Pending,
            current_step: 0,
            data: Value::Null,
            errors: Vec::new(),
            metadata: HashMap::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Append a prepared step
    pub fn add_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn extract(self, handler: Arc<dyn Extractor>, options: Value) -> Self {
        self.add_step(Step::new(StepKind::Extract(handler), options))
    }

    pub fn transform(self, handler: Arc<dyn Transformer>, options: Value) -> Self {
        self.add_step(Step::new(StepKind::Transform(handler), options))
    }

    pub fn validate(self, handler: Arc<dyn Validator>, options: Value) -> Self {
        self.add_step(Step::new(StepKind::Validate(handler), options))
    }

    pub fn load(self, handler: Arc<dyn Loader>, options: Value) -> Self {
        self.add_step(Step::new(StepKind::Load(handler), options))
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Disable a pending step so runs pass over it.
    ///
    /// Returns false if there is no such step or it is not pending.
    pub fn skip_step(&mut self, name: &str) -> bool {
        match self.steps.iter_mut().find(|s| s.name == name) {
            Some(step) if step.status == StepStatus::Pending => {
                *step = step.skipped();
                true
            }
            _ => false,
        }
    }

    pub fn completed_steps(&self) -> usize {
        self.count_steps(StepStatus::Completed)
    }

    pub fn failed_steps(&self) -> usize {
        self.count_steps(StepStatus::Failed)
    }

    fn count_steps(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Index of the first failed step
    pub fn first_failed_step(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status == StepStatus::Failed)
    }

    /// Most recent error
    pub fn last_error(&self) -> Option<&PipelineFailure> {
        self.errors.first()
    }

    /// Milliseconds between `started_at` and `completed_at` (or now)
    pub fn elapsed_ms(&self) -> u64 {
        let Some(started_at) = self.started_at else {
            return 0;
        };
        let until = self.completed_at.unwrap_or_else(Utc::now);
        (until - started_at).num_milliseconds().max(0) as u64
    }

    pub fn progress(&self) -> Progress {
        let total_steps = self.steps.len();
        let completed_steps = self.completed_steps();

        Progress {
            total_steps,
            completed_steps,
            failed_steps: self.failed_steps(),
            percentage: Progress::percentage_of(completed_steps, total_steps),
            status: self.status,
            elapsed_ms: self.elapsed_ms(),
        }
    }

    pub(crate) fn record_error(&mut self, failure: PipelineFailure) {
        self.errors.insert(0, failure);
    }

    pub(crate) fn finish(&mut self, status: PipelineStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Put every executed step back to pending and clear the payload.
    /// Skipped steps stay skipped; the error history is kept.
    pub(crate) fn reset_for_retry(&mut self) {
        for step in self.steps.iter_mut() {
            if step.status != StepStatus::Skipped {
                *step = step.pending();
            }
        }
        self.data = Value::Null;
        self.current_step = 0;
        self.session_id = None;
        self.completed_at = None;
    }

    /// First failed step, else the first step not done yet
    pub(crate) fn resume_point(&self) -> usize {
        self.first_failed_step()
            .or_else(|| self.steps.iter().position(|s| !s.status.is_done()))
            .unwrap_or(self.steps.len())
    }

    /// First completed load step before `index`
    pub(crate) fn first_load_before(&self, index: usize) -> Option<usize> {
        self.steps[..index.min(self.steps.len())]
            .iter()
            .position(|s| s.status == StepStatus::Completed && s.step_type() == StepType::Load)
    }

    /// Payload step `index` receives: the output of the last step before it that produced one
    pub(crate) fn input_for(&self, index: usize) -> Value {
        self.steps[..index.min(self.steps.len())]
            .iter()
            .rev()
            .find_map(|s| s.output().cloned())
            .unwrap_or(Value::Null)
    }

    /// Reset `from` and every later step for a resume
    pub(crate) fn reset_from(&mut self, from: usize) {
        for step in self.steps.iter_mut().skip(from) {
            if step.status != StepStatus::Skipped {
                *step = step.pending();
            }
        }
        self.completed_at = None;
    }
}
