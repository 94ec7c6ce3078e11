//! Telemetry sinks
//!
//! The pipeline reports one event per executed phase. Sinks are
//! fire-and-forget: recording can never fail a run.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Event properties
pub type Properties = BTreeMap<String, Value>;

/// Receives pipeline events
pub trait Telemetry: Send + Sync {
    fn record_event(&self, name: &str, properties: &Properties);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record_event(&self, _name: &str, _properties: &Properties) {}
}

/// Emits every event as a debug log line
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn record_event(&self, name: &str, properties: &Properties) {
        let props = serde_json::to_string(properties).unwrap_or_default();
        tracing::debug!(event = name, properties = %props, "telemetry");
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<(String, Properties)>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events in order
    pub fn events(&self) -> Vec<(String, Properties)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Telemetry for MemoryTelemetry {
    fn record_event(&self, name: &str, properties: &Properties) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), properties.clone()));
    }
}
