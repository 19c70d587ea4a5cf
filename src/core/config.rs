//! Integration configuration from YAML

use crate::core::error::PipelineError;
use crate::core::pipeline::Pipeline;
use crate::core::step::{Step, StepType};
use crate::channel::message_channel::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_QUEUE_SIZE};
use crate::handlers::HandlerRegistry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration loaded from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationConfig {
    #[serde(default)]
    pub channels: ChannelConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
}

/// Defaults for every channel plus per-name overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// How long publish/subscribe callers wait for the channel worker
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    #[serde(default)]
    pub overrides: HashMap<String, ChannelSettings>,
}

/// Per-channel override; unset fields fall back to the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default)]
    pub max_queue_size: Option<usize>,

    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

/// Settings for one channel after applying overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub max_queue_size: usize,
    pub call_timeout_ms: u64,
}

impl ResolvedChannel {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT.as_millis() as u64
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            call_timeout_ms: default_call_timeout_ms(),
            overrides: HashMap::new(),
        }
    }
}

impl ChannelConfig {
    pub fn for_channel(&self, name: &str) -> ResolvedChannel {
        let settings = self.overrides.get(name);
        ResolvedChannel {
            max_queue_size: settings
                .and_then(|s| s.max_queue_size)
                .unwrap_or(self.max_queue_size),
            call_timeout_ms: settings
                .and_then(|s| s.call_timeout_ms)
                .unwrap_or(self.call_timeout_ms),
        }
    }
}

/// Whole-pipeline retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Attempts after the first run, and the base delay of the linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().policy()
    }
}

/// A pipeline as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,

    #[serde(default)]
    pub tenant_id: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// A step as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// extract | transform | validate | load
    #[serde(rename = "type")]
    pub step_type: String,

    /// Name the handler is registered under
    pub handler: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default = "empty_options")]
    pub options: serde_json::Value,
}

fn empty_options() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl StepDefinition {
    /// Configured name, or `{type}_{handler}`
    pub fn step_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}", self.step_type.trim().to_ascii_lowercase(), self.handler),
        }
    }
}

impl PipelineDefinition {
    /// Resolve handlers and build a fresh pending pipeline
    pub fn build(&self, registry: &HandlerRegistry) -> std::result::Result<Pipeline, PipelineError> {
        let mut pipeline = Pipeline::new(&self.name);
        pipeline.tenant_id = self.tenant_id.clone();
        pipeline.metadata = self.metadata.clone();

        for definition in &self.steps {
            let step_type: StepType = definition.step_type.parse()?;
            let kind = registry.resolve(step_type, &definition.handler)?;

            let mut step = Step::new(kind, definition.options.clone()).named(definition.step_name());
            if let Some(timeout_ms) = definition.timeout_ms {
                step = step.with_timeout(Duration::from_millis(timeout_ms));
            }
            pipeline = pipeline.add_step(step);
        }

        Ok(pipeline)
    }
}

impl IntegrationConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: IntegrationConfig = serde_yaml::from_str(yaml).context("Invalid YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.channels.max_queue_size == 0 {
            anyhow::bail!("channels.max_queue_size must be greater than zero");
        }
        if self.channels.call_timeout_ms == 0 {
            anyhow::bail!("channels.call_timeout_ms must be greater than zero");
        }
        for (name, settings) in &self.channels.overrides {
            if settings.max_queue_size == Some(0) {
                anyhow::bail!("Channel '{}' has max_queue_size 0", name);
            }
            if settings.call_timeout_ms == Some(0) {
                anyhow::bail!("Channel '{}' has call_timeout_ms 0", name);
            }
        }

        let mut seen_pipelines = HashSet::new();
        for pipeline in &self.pipelines {
            if !seen_pipelines.insert(pipeline.name.as_str()) {
                anyhow::bail!("Duplicate pipeline name: {}", pipeline.name);
            }

            let mut seen_steps = HashSet::new();
            for step in &pipeline.steps {
                if let Err(err) = step.step_type.parse::<StepType>() {
                    anyhow::bail!("Pipeline '{}': {}", pipeline.name, err);
                }
                let name = step.step_name();
                if !seen_steps.insert(name.clone()) {
                    anyhow::bail!("Pipeline '{}' has duplicate step name: {}", pipeline.name, name);
                }
            }
        }

        Ok(())
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineDefinition> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    /// Build the named pipeline against a handler registry
    pub fn build_pipeline(
        &self,
        name: &str,
        registry: &HandlerRegistry,
    ) -> std::result::Result<Pipeline, PipelineError> {
        self.pipeline(name)
            .ok_or_else(|| PipelineError::UnknownPipeline(name.to_string()))?
            .build(registry)
    }
}
