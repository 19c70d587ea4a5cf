//! Test utilities: scripted handlers, event capture and assertions
#![allow(dead_code)]

use async_trait::async_trait;
use integration_core::core::state::StepStatus;
use integration_core::execution::PipelineEvent;
use integration_core::sessions::SessionId;
use integration_core::{
    Extractor, HandlerError, InMemorySessionService, Loader, Pipeline, PipelineEngine, StepContext, Transformer,
    ValidationOutcome, Validator,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Extractor returning fixed records, optionally failing its first calls
pub struct MockExtractor {
    name: String,
    records: Value,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new(name: &str, records: Value) -> Self {
        Self {
            name: name.to_string(),
            records,
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the first `times` calls
    pub fn failing(name: &str, records: Value, times: usize) -> Self {
        let extractor = Self::new(name, records);
        extractor.failures_left.store(times, Ordering::SeqCst);
        extractor
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, _options: &Value, _ctx: &StepContext) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(HandlerError::new("source unavailable"));
        }
        Ok(self.records.clone())
    }
}

/// Transformer that fails until `fix()` is called
pub struct FixableTransformer {
    name: String,
    fixed: AtomicBool,
    calls: AtomicUsize,
}

impl FixableTransformer {
    pub fn broken(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fixed: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn working(name: &str) -> Self {
        let transformer = Self::broken(name);
        transformer.fix();
        transformer
    }

    pub fn fix(&self) {
        self.fixed.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transformer for FixableTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    /// Wraps every record as `{"value": record}`
    async fn transform(&self, data: &Value, _options: &Value, _ctx: &StepContext) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.fixed.load(Ordering::SeqCst) {
            return Err(HandlerError::new("unmapped field 'cust_no'"));
        }

        let records = data.as_array().cloned().unwrap_or_default();
        Ok(Value::Array(records.into_iter().map(|r| json!({ "value": r })).collect()))
    }
}

/// Transformer that panics on every call
pub struct PanickingTransformer;

#[async_trait]
impl Transformer for PanickingTransformer {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn transform(&self, _data: &Value, _options: &Value, _ctx: &StepContext) -> Result<Value, HandlerError> {
        panic!("index out of bounds");
    }
}

/// Validator that passes everything with one warning per record missing `value`
pub struct WarningValidator;

#[async_trait]
impl Validator for WarningValidator {
    fn name(&self) -> &str {
        "warn_missing"
    }

    async fn validate(&self, data: &Value, _options: &Value, _ctx: &StepContext)
        -> Result<ValidationOutcome, HandlerError> {
        let warnings: Vec<String> = data
            .as_array()
            .map(|records| {
                records
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.get("value").is_none())
                    .map(|(i, _)| format!("record {} has no value", i))
                    .collect()
            })
            .unwrap_or_default();

        if warnings.is_empty() {
            Ok(ValidationOutcome::Valid(data.clone()))
        } else {
            Ok(ValidationOutcome::ValidWithWarnings {
                data: data.clone(),
                warnings,
            })
        }
    }
}

/// Loader that records what it was given and where
pub struct CollectingLoader {
    name: String,
    loaded: Mutex<Vec<(Option<SessionId>, Value)>>,
}

impl CollectingLoader {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            loaded: Mutex::new(Vec::new()),
        }
    }

    pub fn loaded(&self) -> Vec<(Option<SessionId>, Value)> {
        self.loaded.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.loaded.lock().unwrap().len()
    }
}

#[async_trait]
impl Loader for CollectingLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, data: &Value, _options: &Value, ctx: &StepContext) -> Result<Value, HandlerError> {
        self.loaded
            .lock()
            .unwrap()
            .push((ctx.session_id.clone(), data.clone()));
        let count = data.as_array().map(|a| a.len()).unwrap_or(0);
        Ok(json!({ "loaded": count }))
    }
}

/// Handlers of the standard three-step test pipeline
pub struct Fixture {
    pub extractor: Arc<MockExtractor>,
    pub transformer: Arc<FixableTransformer>,
    pub loader: Arc<CollectingLoader>,
}

impl Fixture {
    pub fn new(transformer: FixableTransformer) -> Self {
        Self {
            extractor: Arc::new(MockExtractor::new("contracts", json!([1, 2, 3]))),
            transformer: Arc::new(transformer),
            loader: Arc::new(CollectingLoader::new("staging")),
        }
    }

    /// extract_contracts -> transform_normalize -> load_staging
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new("import_contracts")
            .extract(self.extractor.clone(), json!({}))
            .transform(self.transformer.clone(), json!({}))
            .load(self.loader.clone(), json!({}))
    }
}

pub fn engine(sessions: &Arc<InMemorySessionService>) -> PipelineEngine {
    PipelineEngine::new(sessions.clone())
}

/// Record every event the engine emits
pub async fn capture_events(engine: &PipelineEngine) -> Arc<Mutex<Vec<PipelineEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine
        .add_event_handler(move |event| sink.lock().unwrap().push(event))
        .await;
    events
}

pub fn event_names(events: &Arc<Mutex<Vec<PipelineEvent>>>) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(|e| e.kind.name()).collect()
}

pub fn statuses(pipeline: &Pipeline) -> Vec<StepStatus> {
    pipeline.steps.iter().map(|s| s.status).collect()
}
