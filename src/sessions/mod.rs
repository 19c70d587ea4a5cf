//! Staging session contract
//!
//! A staging session is an external unit of work. Loaders write into it and
//! the engine commits or rolls it back once the run is decided.

pub mod memory;

pub use memory::{InMemorySessionService, SessionState};

use crate::core::error::SessionError;
use crate::core::pipeline::Pipeline;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to a staging session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for staging session backends
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Open a session for a pipeline run
    async fn create_session(&self, pipeline: &Pipeline) -> Result<SessionId, SessionError>;

    async fn commit_session(&self, session_id: &SessionId) -> Result<(), SessionError>;

    async fn rollback_session(&self, session_id: &SessionId) -> Result<(), SessionError>;
}
