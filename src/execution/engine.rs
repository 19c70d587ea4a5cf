//! Main execution engine - drives a pipeline through its state machine

use crate::{
    core::{
        config::RetryPolicy,
        context::{RunContext, StepContext},
        error::{PipelineError, PipelineFailure, SessionError},
        pipeline::Pipeline,
        state::PipelineStatus,
    },
    execution::{
        events::{EventHandler, EventKind, PipelineEvent},
        executor::StepExecutor,
    },
    sessions::SessionService,
    telemetry::{self, Telemetry},
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Main pipeline execution engine
///
/// Runs block the calling task until the pipeline reaches a terminal state.
/// Several pipelines may run concurrently on one engine; they share only the
/// session service.
pub struct PipelineEngine {
    sessions: Arc<dyn SessionService>,
    executor: StepExecutor,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
    telemetry: Telemetry,
}

impl PipelineEngine {
    pub fn new(sessions: Arc<dyn SessionService>) -> Self {
        Self {
            sessions,
            executor: StepExecutor::new(),
            event_handlers: Arc::new(Mutex::new(Vec::new())),
            telemetry: telemetry::default_sink(),
        }
    }

    pub fn with_executor(mut self, executor: StepExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to telemetry and all handlers
    async fn emit(&self, event: PipelineEvent) {
        if let Some(measurement) = event.measurement() {
            self.telemetry.record(&measurement);
        }

        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Execute the pipeline once.
    ///
    /// Steps already completed are passed over. On failure the session is
    /// rolled back before returning; the pipeline ends `rolled_back`, or
    /// `rollback_failed` with [`PipelineError::RollbackFailed`].
    pub async fn run(&self, pipeline: &mut Pipeline, ctx: &RunContext) -> Result<(), PipelineError> {
        if pipeline.status == PipelineStatus::RollbackFailed {
            return Err(invalid_state(pipeline, "run"));
        }

        if pipeline.tenant_id.is_none() {
            pipeline.tenant_id = ctx.tenant_id.clone();
        }
        pipeline.status = PipelineStatus::Running;
        pipeline.started_at = Some(Utc::now());
        pipeline.completed_at = None;

        info!(
            pipeline = %pipeline.name,
            run_id = %pipeline.run_id,
            steps = pipeline.steps.len(),
            "Starting pipeline run"
        );
        let started = EventKind::PipelineStarted {
            total_steps: pipeline.steps.len(),
        };
        self.emit(PipelineEvent::new(pipeline, started)).await;

        self.open_session(pipeline).await?;
        let failure = self.execute_steps(pipeline, ctx).await;
        self.finalize(pipeline, failure).await
    }

    /// Run the whole pipeline, retrying from the top after a failure.
    ///
    /// Waits `retry_delay * attempt` before each retry. A rollback failure is
    /// never retried.
    pub async fn run_with_retry(
        &self,
        pipeline: &mut Pipeline,
        ctx: &RunContext,
        policy: RetryPolicy,
    ) -> Result<(), PipelineError> {
        let mut attempt: u32 = 1;

        loop {
            let err = match self.run(pipeline, ctx).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if err.is_fatal() || err.is_protocol() {
                error!(pipeline = %pipeline.name, attempt, "Pipeline failed, not retrying: {}", err);
                return Err(err);
            }
            if attempt > policy.max_retries {
                error!(
                    pipeline = %pipeline.name,
                    attempts = attempt,
                    "Pipeline failed after all retries: {}",
                    err
                );
                return Err(err);
            }

            let delay = policy.delay_for(attempt);
            warn!(
                pipeline = %pipeline.name,
                attempt,
                max_retries = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Pipeline attempt failed, retrying: {}",
                err
            );
            let scheduled = EventKind::RetryScheduled {
                attempt,
                delay_ms: delay.as_millis() as u64,
            };
            self.emit(PipelineEvent::new(pipeline, scheduled)).await;

            tokio::time::sleep(delay).await;
            pipeline.reset_for_retry();
            attempt += 1;
        }
    }

    /// Re-enter a failed pipeline at its first failed step.
    ///
    /// Legal from `failed` and `rolled_back`. Earlier steps keep their
    /// results. When the previous session was rolled back a new one is
    /// opened, and execution moves back to the first load step that wrote
    /// into the lost session, so everything committed was loaded in the new one.
    pub async fn resume(&self, pipeline: &mut Pipeline, ctx: &RunContext) -> Result<(), PipelineError> {
        if !matches!(pipeline.status, PipelineStatus::Failed | PipelineStatus::RolledBack) {
            return Err(invalid_state(pipeline, "resume"));
        }

        let mut from = pipeline.resume_point();
        if pipeline.session_id.is_none() {
            if let Some(load) = pipeline.first_load_before(from) {
                debug!(pipeline = %pipeline.name, from_step = load, "Reloading into a new session");
                from = load;
            }
        }
        pipeline.reset_from(from);
        pipeline.data = pipeline.input_for(from);

        if pipeline.tenant_id.is_none() {
            pipeline.tenant_id = ctx.tenant_id.clone();
        }
        pipeline.status = PipelineStatus::Running;
        pipeline.started_at.get_or_insert_with(Utc::now);

        info!(pipeline = %pipeline.name, run_id = %pipeline.run_id, from_step = from, "Resuming pipeline");

        if pipeline.session_id.is_none() {
            self.open_session(pipeline).await?;
        }
        let failure = self.execute_steps(pipeline, ctx).await;
        self.finalize(pipeline, failure).await
    }

    /// Roll back the pipeline's session.
    ///
    /// Without a session this just marks the pipeline `rolled_back`. A
    /// `rollback_failed` pipeline can be rolled back again.
    pub async fn rollback(&self, pipeline: &mut Pipeline) -> Result<(), PipelineError> {
        match pipeline.status {
            PipelineStatus::Completed | PipelineStatus::Running => Err(invalid_state(pipeline, "rollback")),
            PipelineStatus::RolledBack => Ok(()),
            _ => match self.rollback_session(pipeline).await {
                Ok(()) => {
                    pipeline.finish(PipelineStatus::RolledBack);
                    Ok(())
                }
                Err(err) => {
                    pipeline.finish(PipelineStatus::RollbackFailed);
                    Err(PipelineError::RollbackFailed(err))
                }
            },
        }
    }

    async fn open_session(&self, pipeline: &mut Pipeline) -> Result<(), PipelineError> {
        match self.sessions.create_session(pipeline).await {
            Ok(session_id) => {
                debug!(pipeline = %pipeline.name, session = %session_id, "Session opened");
                pipeline.session_id = Some(session_id);
                Ok(())
            }
            Err(err) => {
                error!(pipeline = %pipeline.name, "Could not open session: {}", err);
                pipeline.record_error(PipelineFailure::Session { error: err.clone() });
                pipeline.finish(PipelineStatus::Failed);
                self.emit_failed(pipeline, &err.to_string()).await;
                Err(PipelineError::SessionCreate(err))
            }
        }
    }

    /// Run every step that is not done yet, halting at the first failure
    async fn execute_steps(&self, pipeline: &mut Pipeline, ctx: &RunContext) -> Option<PipelineError> {
        for index in 0..pipeline.steps.len() {
            if pipeline.steps[index].status.is_done() {
                continue;
            }

            pipeline.steps[index] = pipeline.steps[index].running();
            pipeline.current_step = index;
            let step = pipeline.steps[index].name.clone();

            debug!(pipeline = %pipeline.name, step = %step, index, "Step started");
            let started = EventKind::StepStarted {
                step: step.clone(),
                index,
            };
            self.emit(PipelineEvent::new(pipeline, started)).await;

            let step_ctx = StepContext::for_step(pipeline, index, ctx);
            let result = self
                .executor
                .execute(&pipeline.steps[index], &pipeline.data, &step_ctx)
                .await;

            match result.outcome {
                Ok(output) => {
                    for warning in &output.warnings {
                        warn!(pipeline = %pipeline.name, step = %step, "Validation warning: {}", warning);
                    }
                    pipeline.steps[index] =
                        pipeline.steps[index].completed(output.data.clone(), output.warnings, result.duration_ms);
                    pipeline.data = output.data;

                    info!(
                        pipeline = %pipeline.name,
                        step = %step,
                        duration_ms = result.duration_ms,
                        "Step completed"
                    );
                    let completed = EventKind::StepCompleted {
                        step,
                        duration_ms: result.duration_ms,
                        progress: pipeline.progress(),
                    };
                    self.emit(PipelineEvent::new(pipeline, completed)).await;
                }
                Err(err) => {
                    error!(
                        pipeline = %pipeline.name,
                        step = %step,
                        reason = err.tag(),
                        "Step failed: {}",
                        err
                    );
                    pipeline.steps[index] = pipeline.steps[index].failed(err.clone(), result.duration_ms);
                    pipeline.record_error(PipelineFailure::Step {
                        step: step.clone(),
                        error: err.clone(),
                    });
                    pipeline.status = PipelineStatus::Failed;

                    let failed = EventKind::StepFailed {
                        step: step.clone(),
                        duration_ms: result.duration_ms,
                        error: err.to_string(),
                    };
                    self.emit(PipelineEvent::new(pipeline, failed)).await;

                    return Some(PipelineError::StepFailed { step, error: err });
                }
            }
        }

        None
    }

    /// Commit after success, roll back after failure
    async fn finalize(&self, pipeline: &mut Pipeline, failure: Option<PipelineError>) -> Result<(), PipelineError> {
        if let Some(cause) = failure {
            return self.rollback_after_failure(pipeline, cause).await;
        }

        if let Some(session_id) = pipeline.session_id.clone() {
            if let Err(err) = self.sessions.commit_session(&session_id).await {
                error!(pipeline = %pipeline.name, session = %session_id, "Commit failed: {}", err);
                pipeline.record_error(PipelineFailure::Session { error: err.clone() });
                pipeline.status = PipelineStatus::Failed;
                return self.rollback_after_failure(pipeline, PipelineError::Commit(err)).await;
            }
        }

        pipeline.finish(PipelineStatus::Completed);
        info!(
            pipeline = %pipeline.name,
            run_id = %pipeline.run_id,
            elapsed_ms = pipeline.elapsed_ms(),
            "Pipeline completed"
        );
        let completed = EventKind::PipelineCompleted {
            elapsed_ms: pipeline.elapsed_ms(),
        };
        self.emit(PipelineEvent::new(pipeline, completed)).await;
        Ok(())
    }

    async fn rollback_after_failure(&self, pipeline: &mut Pipeline, cause: PipelineError) -> Result<(), PipelineError> {
        let outcome = self.rollback_session(pipeline).await;

        let (status, err) = match outcome {
            Ok(()) => (PipelineStatus::RolledBack, cause),
            Err(err) => (PipelineStatus::RollbackFailed, PipelineError::RollbackFailed(err)),
        };
        pipeline.finish(status);
        self.emit_failed(pipeline, &err.to_string()).await;
        Err(err)
    }

    /// Roll back the session, if any. On success the session is forgotten.
    async fn rollback_session(&self, pipeline: &mut Pipeline) -> Result<(), SessionError> {
        let Some(session_id) = pipeline.session_id.clone() else {
            debug!(pipeline = %pipeline.name, "No session to roll back");
            self.emit(PipelineEvent::new(pipeline, EventKind::RolledBack)).await;
            return Ok(());
        };

        match self.sessions.rollback_session(&session_id).await {
            Ok(()) => {
                info!(pipeline = %pipeline.name, session = %session_id, "Session rolled back");
                pipeline.session_id = None;
                self.emit(PipelineEvent::new(pipeline, EventKind::RolledBack)).await;
                Ok(())
            }
            Err(err) => {
                error!(
                    pipeline = %pipeline.name,
                    session = %session_id,
                    "Rollback failed, manual intervention required: {}",
                    err
                );
                pipeline.record_error(PipelineFailure::Session { error: err.clone() });
                let failed = EventKind::RollbackFailed {
                    error: err.to_string(),
                };
                self.emit(PipelineEvent::new(pipeline, failed)).await;
                Err(err)
            }
        }
    }

    async fn emit_failed(&self, pipeline: &Pipeline, error: &str) {
        let failed = EventKind::PipelineFailed {
            status: pipeline.status,
            elapsed_ms: pipeline.elapsed_ms(),
            error: error.to_string(),
        };
        self.emit(PipelineEvent::new(pipeline, failed)).await;
    }
}

fn invalid_state(pipeline: &Pipeline, operation: &'static str) -> PipelineError {
    warn!(
        pipeline = %pipeline.name,
        status = %pipeline.status,
        operation,
        "Invalid pipeline state"
    );
    PipelineError::InvalidState {
        pipeline: pipeline.name.clone(),
        operation,
        status: pipeline.status,
    }
}
