// Diagnostic key/value output

use serde::Serialize;
use std::collections::BTreeMap;

/// Best-effort numeric publish channel. Implementations must not block or panic.
pub trait TelemetrySink {
    fn publish(&mut self, key: &str, value: f64);
}

/// Collects one tick's worth of values so the runtime can ship them as a single message
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct TelemetryFrame {
    values: BTreeMap<String, f64>,
}

impl TelemetryFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl TelemetrySink for TelemetryFrame {
    fn publish(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }
}
