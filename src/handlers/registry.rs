//! Name to handler lookup used when building pipelines from configuration

use crate::core::error::PipelineError;
use crate::core::step::{StepKind, StepType};
use crate::handlers::{Extractor, Loader, Transformer, Validator};
use std::collections::HashMap;
use std::sync::Arc;

/// Handlers by step type and registered name
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
    transformers: HashMap<String, Arc<dyn Transformer>>,
    validators: HashMap<String, Arc<dyn Validator>>,
    loaders: HashMap<String, Arc<dyn Loader>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_extractor(&mut self, handler: Arc<dyn Extractor>) -> &mut Self {
        self.extractors.insert(handler.name().to_string(), handler);
        self
    }

    pub fn register_transformer(&mut self, handler: Arc<dyn Transformer>) -> &mut Self {
        self.transformers.insert(handler.name().to_string(), handler);
        self
    }

    pub fn register_validator(&mut self, handler: Arc<dyn Validator>) -> &mut Self {
        self.validators.insert(handler.name().to_string(), handler);
        self
    }

    pub fn register_loader(&mut self, handler: Arc<dyn Loader>) -> &mut Self {
        self.loaders.insert(handler.name().to_string(), handler);
        self
    }

    /// Look up the handler for a configured step
    pub fn resolve(&self, step_type: StepType, name: &str) -> Result<StepKind, PipelineError> {
        let kind = match step_type {
            StepType::Extract => self.extractors.get(name).cloned().map(StepKind::Extract),
            StepType::Transform => self.transformers.get(name).cloned().map(StepKind::Transform),
            StepType::Validate => self.validators.get(name).cloned().map(StepKind::Validate),
            StepType::Load => self.loaders.get(name).cloned().map(StepKind::Load),
        };

        kind.ok_or_else(|| PipelineError::UnknownHandler {
            kind: step_type,
            name: name.to_string(),
        })
    }

    /// Registered names for a step type, sorted
    pub fn names(&self, step_type: StepType) -> Vec<&str> {
        let mut names: Vec<&str> = match step_type {
            StepType::Extract => self.extractors.keys().map(String::as_str).collect(),
            StepType::Transform => self.transformers.keys().map(String::as_str).collect(),
            StepType::Validate => self.validators.keys().map(String::as_str).collect(),
            StepType::Load => self.loaders.keys().map(String::as_str).collect(),
        };
        names.sort_unstable();
        names
    }
}
