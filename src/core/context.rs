//! Run and step contexts handed to collaborators

use crate::core::pipeline::Pipeline;
use crate::sessions::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller-supplied context for a pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    /// Tenant the run belongs to (adopted by pipelines without one)
    pub tenant_id: Option<String>,

    /// User who triggered the run, if any
    pub user_id: Option<String>,

    /// Free-form attributes passed through to every handler
    pub attributes: HashMap<String, serde_json::Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }
}

/// What a handler sees about the step it runs in
#[derive(Debug, Clone)]
pub struct StepContext {
    pub pipeline: String,
    pub step: String,
    pub tenant_id: Option<String>,

    /// Staging session loaders write into
    pub session_id: Option<SessionId>,

    pub run: RunContext,
}

impl StepContext {
    pub(crate) fn for_step(pipeline: &Pipeline, index: usize, run: &RunContext) -> Self {
        Self {
            pipeline: pipeline.name.clone(),
            step: pipeline
                .steps
                .get(index)
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            tenant_id: pipeline.tenant_id.clone(),
            session_id: pipeline.session_id.clone(),
            run: run.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_context_builder() {
        let ctx = RunContext::for_tenant("acme")
            .with_user("u-1")
            .with_attribute("batch", json!(7));

        assert_eq!(ctx.tenant_id.as_deref(), Some("acme"));
        assert_eq!(ctx.user_id.as_deref(), Some("u-1"));
        assert_eq!(ctx.attribute("batch"), Some(&json!(7)));
        assert_eq!(ctx.attribute("missing"), None);
    }
}
