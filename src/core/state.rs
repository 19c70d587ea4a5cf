//! Execution state models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Built but never run
    Pending,
    /// Steps are executing
    Running,
    /// Every step completed and the session was committed
    Completed,
    /// A step, the session or the commit failed
    Failed,
    /// Failed, and the session was rolled back
    RolledBack,
    /// Failed, and the rollback failed too. Needs manual intervention.
    RollbackFailed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
            PipelineStatus::RolledBack => "rolled_back",
            PipelineStatus::RollbackFailed => "rollback_failed",
        }
    }

    /// No further transition happens without an explicit call
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineStatus::Pending | PipelineStatus::Running)
    }

    /// Whether the run ended unsuccessfully
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Failed | PipelineStatus::RolledBack | PipelineStatus::RollbackFailed
        )
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Disabled by the caller; never executed
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Whether the engine will not execute the step again
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only progress view of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    /// `completed / total * 100`, zero without steps
    pub percentage: f64,
    pub status: PipelineStatus,
    /// Zero if the pipeline never started
    pub elapsed_ms: u64,
}

impl Progress {
    pub fn percentage_of(completed: usize, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        completed as f64 / total as f64 * 100.0
    }
}
