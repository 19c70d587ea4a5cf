//! Structured measurements for external telemetry consumers
//!
//! Every pipeline lifecycle transition and every channel backpressure event
//! produces a [`Measurement`]. Where it ends up is decided by the
//! [`TelemetrySink`] the engine or channel was built with.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// A named numeric observation with a tag set
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            tags: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a tag only when a value is present
    pub fn tag_opt(self, key: impl Into<String>, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.tag(key, value),
            None => self,
        }
    }
}

/// Destination for measurements
pub trait TelemetrySink: Send + Sync {
    fn record(&self, measurement: &Measurement);
}

/// Shared sink handle
pub type Telemetry = Arc<dyn TelemetrySink>;

/// Emits measurements as `tracing` events on the `telemetry` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, measurement: &Measurement) {
        info!(
            target: "telemetry",
            name = %measurement.name,
            value = measurement.value,
            tags = ?measurement.tags,
            "measurement"
        );
    }
}

/// Keeps every measurement in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    measurements: Mutex<Vec<Measurement>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All measurements recorded so far
    pub fn measurements(&self) -> Vec<Measurement> {
        self.measurements
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Measurements with the given name
    pub fn named(&self, name: &str) -> Vec<Measurement> {
        self.measurements()
            .into_iter()
            .filter(|m| m.name == name)
            .collect()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, measurement: &Measurement) {
        if let Ok(mut measurements) = self.measurements.lock() {
            measurements.push(measurement.clone());
        }
    }
}

/// The sink used when none is configured
pub fn default_sink() -> Telemetry {
    Arc::new(TracingSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_tags() {
        let m = Measurement::new("pipeline.step.stop", 12.0)
            .tag("pipeline", "import")
            .tag_opt("tenant", Some("acme"))
            .tag_opt("step", None);

        assert_eq!(m.tags.get("pipeline").map(String::as_str), Some("import"));
        assert_eq!(m.tags.get("tenant").map(String::as_str), Some("acme"));
        assert!(!m.tags.contains_key("step"));
    }

    #[test]
    fn test_memory_sink_records() {
        let sink = MemorySink::new();
        sink.record(&Measurement::new("a", 1.0));
        sink.record(&Measurement::new("b", 2.0));
        sink.record(&Measurement::new("a", 3.0));

        assert_eq!(sink.measurements().len(), 3);
        let named = sink.named("a");
        assert_eq!(named.len(), 2);
        assert_eq!(named[1].value, 3.0);
    }
}
