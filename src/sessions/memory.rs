//! In-memory session service with fault injection

use crate::core::error::{SessionError, SessionOperation};
use crate::core::pipeline::Pipeline;
use crate::sessions::{SessionId, SessionService};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Lifecycle of a staging session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Committed,
    RolledBack,
}

/// What the service knows about one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub pipeline: String,
    pub tenant_id: Option<String>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

/// Session service that keeps sessions in memory (for testing or ephemeral use)
///
/// Each `fail_next_*` call makes the next operation of that kind fail once.
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
    faults: RwLock<HashMap<SessionOperation, Vec<String>>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            faults: RwLock::new(HashMap::new()),
        }
    }

    pub async fn fail_next_create(&self, reason: impl Into<String>) {
        self.inject(SessionOperation::Create, reason.into()).await;
    }

    pub async fn fail_next_commit(&self, reason: impl Into<String>) {
        self.inject(SessionOperation::Commit, reason.into()).await;
    }

    pub async fn fail_next_rollback(&self, reason: impl Into<String>) {
        self.inject(SessionOperation::Rollback, reason.into()).await;
    }

    async fn inject(&self, operation: SessionOperation, reason: String) {
        self.faults.write().await.entry(operation).or_default().push(reason);
    }

    /// Take the oldest pending fault for an operation, if any
    async fn take_fault(&self, operation: SessionOperation) -> Result<(), SessionError> {
        let mut faults = self.faults.write().await;
        match faults.get_mut(&operation) {
            Some(pending) if !pending.is_empty() => Err(SessionError::new(operation, pending.remove(0))),
            _ => Ok(()),
        }
    }

    pub async fn session(&self, id: &SessionId) -> Option<SessionRecord> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn state(&self, id: &SessionId) -> Option<SessionState> {
        self.sessions.read().await.get(id).map(|s| s.state)
    }

    /// Number of sessions currently in `state`
    pub async fn count(&self, state: SessionState) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.state == state)
            .count()
    }

    async fn close(&self, id: &SessionId, operation: SessionOperation, state: SessionState) -> Result<(), SessionError> {
        self.take_fault(operation).await?;

        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::new(operation, format!("unknown session {}", id)))?;

        if record.state != SessionState::Open {
            return Err(SessionError::new(
                operation,
                format!("session {} is not open", id),
            ));
        }

        record.state = state;
        debug!(session = %id, ?state, "Session closed");
        Ok(())
    }
}

impl Default for InMemorySessionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionService for InMemorySessionService {
    async fn create_session(&self, pipeline: &Pipeline) -> Result<SessionId, SessionError> {
        self.take_fault(SessionOperation::Create).await?;

        let id = SessionId::new(Uuid::new_v4().to_string());
        let record = SessionRecord {
            id: id.clone(),
            pipeline: pipeline.name.clone(),
            tenant_id: pipeline.tenant_id.clone(),
            state: SessionState::Open,
            created_at: Utc::now(),
        };
        self.sessions.write().await.insert(id.clone(), record);

        debug!(session = %id, pipeline = %pipeline.name, "Session opened");
        Ok(id)
    }

    async fn commit_session(&self, session_id: &SessionId) -> Result<(), SessionError> {
        self.close(session_id, SessionOperation::Commit, SessionState::Committed)
            .await
    }

    async fn rollback_session(&self, session_id: &SessionId) -> Result<(), SessionError> {
        self.close(session_id, SessionOperation::Rollback, SessionState::RolledBack)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let service = InMemorySessionService::new();
        let pipeline = Pipeline::new("import").with_tenant("acme");

        let id = service.create_session(&pipeline).await.unwrap();
        let record = service.session(&id).await.unwrap();
        assert_eq!(record.pipeline, "import");
        assert_eq!(record.tenant_id.as_deref(), Some("acme"));
        assert_eq!(record.state, SessionState::Open);

        service.commit_session(&id).await.unwrap();
        assert_eq!(service.state(&id).await, Some(SessionState::Committed));

        // A closed session cannot be closed again
        let err = service.rollback_session(&id).await.unwrap_err();
        assert_eq!(err.operation, SessionOperation::Rollback);
    }

    #[tokio::test]
    async fn test_faults_fire_once() {
        let service = InMemorySessionService::new();
        let pipeline = Pipeline::new("import");

        service.fail_next_create("pool exhausted").await;
        let err = service.create_session(&pipeline).await.unwrap_err();
        assert_eq!(err, SessionError::new(SessionOperation::Create, "pool exhausted"));

        let id = service.create_session(&pipeline).await.unwrap();
        service.fail_next_rollback("connection reset").await;
        assert!(service.rollback_session(&id).await.is_err());
        assert_eq!(service.state(&id).await, Some(SessionState::Open));

        service.rollback_session(&id).await.unwrap();
        assert_eq!(service.count(SessionState::RolledBack).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let service = InMemorySessionService::new();
        let err = service
            .commit_session(&SessionId::new("nope"))
            .await
            .unwrap_err();
        assert!(err.reason.contains("unknown session"));
    }
}
