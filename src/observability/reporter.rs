use super::span::SpanRecord;

/// Sink for finished spans.
pub trait SpanReporter: Send + Sync {
    fn report(&self, record: SpanRecord);
}

/// Reports spans as structured `tracing` events on the `spans` target.
#[derive(Debug, Clone)]
pub struct LogReporter {
    service_name: String,
}

impl LogReporter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl SpanReporter for LogReporter {
    fn report(&self, record: SpanRecord) {
        tracing::info!(
            target: "spans",
            service = %self.service_name,
            request_id = %record.request_id,
            span_id = %record.span_id,
            parent_span_id = record.parent_span_id.as_deref().unwrap_or("-"),
            name = %record.name,
            kind = %record.kind,
            status = %record.status,
            duration_ms = record.duration_ms,
            attributes = %record.attributes,
            "span finished"
        );
    }
}
