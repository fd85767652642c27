//! The Log Record (spec.md §3): the unit that flows through the pipeline.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Map;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionDescriptor {
    pub class_name: String,
    pub message: String,
}

/// Created by producers, mutated only by the pipeline (and only by
/// constructing new instances), released once its frame is acknowledged by
/// the broker or written to fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_ms: u64,
    pub level: Severity,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub context: BTreeMap<String, String>,
    pub message: String,
    pub payload: Map<String, serde_json::Value>,
    pub exception: Option<ExceptionDescriptor>,
    pub repeat_count: Option<u32>,
    /// Populated by the Integrity Chain stage; `"sha256:" + hex`.
    pub integrity: Option<String>,
    /// Populated by the Envelope Encryption stage; base64.
    pub wrapped_dek: Option<String>,
}

impl LogRecord {
    pub fn new(level: Severity, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            timestamp_ms,
            level,
            trace_id: None,
            span_id: None,
            context: BTreeMap::new(),
            message: message.into(),
            payload: Map::new(),
            exception: None,
            repeat_count: None,
            integrity: None,
            wrapped_dek: None,
        }
    }

    pub fn with_payload(mut self, payload: Map<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_trace_context(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    pub fn with_exception(mut self, exception: ExceptionDescriptor) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = context;
        self
    }
}

/// Builds the `00-<trace_id>-<span_id>-<flags>` W3C traceparent form used as
/// the serialized form of a record's distributed-trace context.
pub fn format_traceparent(trace_id: &str, span_id: &str) -> String {
    format!("00-{trace_id}-{span_id}-01")
}

/// Parses a traceparent header into `(trace_id, span_id)`. Returns `None`
/// for anything that doesn't match `00-<32 hex>-<16 hex>-<2 hex>`; the
/// pipeline only reads context, it never rejects a record over a malformed
/// incoming header.
pub fn parse_traceparent(header: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = header.split('-').collect();
    if parts.len() != 4 {
        return None;
    }
    let (version, trace_id, span_id, flags) = (parts[0], parts[1], parts[2], parts[3]);
    if version.len() != 2 || trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
        return None;
    }
    if ![version, trace_id, span_id, flags].iter().all(|s| s.bytes().all(|b| b.is_ascii_hexdigit())) {
        return None;
    }
    Some((trace_id.to_string(), span_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traceparent_round_trips() {
        let trace_id = "4bf92f3577b34da6a3ce929d0e0e4736";
        let span_id = "00f067aa0ba902b7";
        let header = format_traceparent(trace_id, span_id);
        let (parsed_trace, parsed_span) = parse_traceparent(&header).unwrap();
        assert_eq!(parsed_trace, trace_id);
        assert_eq!(parsed_span, span_id);
    }

    #[test]
    fn rejects_malformed_traceparent() {
        assert!(parse_traceparent("not-a-traceparent").is_none());
        assert!(parse_traceparent("00-tooshort-00f067aa0ba902b7-01").is_none());
    }

    #[test]
    fn new_record_has_no_pipeline_fields_set() {
        let record = LogRecord::new(Severity::Info, "hello");
        assert!(record.integrity.is_none());
        assert!(record.wrapped_dek.is_none());
    }
}
