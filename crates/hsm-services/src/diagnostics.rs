//! Diagnostics sinks.
//!
//! Components never reach for a global logger list. A sink is built once at
//! startup (usually a [`SinkSet`]) and handed to each component as a
//! [`SharedSink`]. Each record carries a severity, ordered key/value fields
//! and a message.

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Fixed-width label used in plain-text output.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Debug => "DEBG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERRO",
        }
    }
}

/// Accepts structured log records.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, severity: Severity, fields: &[(&str, String)], message: &str);

    fn info(&self, fields: &[(&str, String)], message: &str) {
        self.record(Severity::Info, fields, message);
    }

    fn warn(&self, fields: &[(&str, String)], message: &str) {
        self.record(Severity::Warn, fields, message);
    }

    fn error(&self, fields: &[(&str, String)], message: &str) {
        self.record(Severity::Error, fields, message);
    }
}

pub type SharedSink = Arc<dyn DiagnosticsSink>;

/// Render fields as `key=value` pairs separated by spaces, in order.
pub fn render_fields(fields: &[(&str, String)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Tracing ───────────────────────────────────────────────────────────────────

/// Forwards records to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, severity: Severity, fields: &[(&str, String)], message: &str) {
        let fields = render_fields(fields);
        match severity {
            Severity::Debug => tracing::debug!(%fields, "{message}"),
            Severity::Info => tracing::info!(%fields, "{message}"),
            Severity::Warn => tracing::warn!(%fields, "{message}"),
            Severity::Error => tracing::error!(%fields, "{message}"),
        }
    }
}

// ── Fan-out ───────────────────────────────────────────────────────────────────

/// Explicit list of destinations. Every record goes to every sink.
#[derive(Default, Clone)]
pub struct SinkSet {
    sinks: Vec<SharedSink>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DiagnosticsSink for SinkSet {
    fn record(&self, severity: Severity, fields: &[(&str, String)], message: &str) {
        for sink in &self.sinks {
            sink.record(severity, fields, message);
        }
    }
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// An owned copy of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    pub severity: Severity,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedRecord {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Keeps every record in memory. Used by tests to assert on diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<CapturedRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Records at `severity` whose message contains `needle`.
    pub fn count(&self, severity: Severity, needle: &str) -> usize {
        self.records()
            .iter()
            .filter(|r| r.severity == severity && r.message.contains(needle))
            .count()
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(&self, severity: Severity, fields: &[(&str, String)], message: &str) {
        let captured = CapturedRecord {
            severity,
            message: message.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        };
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(captured);
    }
}
