//! Lightweight span context for request tracing

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

tokio::task_local! {
    static CURRENT_PARENT: SpanContext;
}

/// Span kind (similar to OpenTelemetry, but simplified)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// Server-side request handler
    Server,
    /// Client-side outgoing call (e.g. a database command)
    Client,
    /// Internal operation
    Internal,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
            Self::Internal => "internal",
        }
    }
}

/// Span context for distributed tracing
///
/// Each HTTP request creates a root span whose `request_id` is the request's
/// `X-Request-Id`. Store calls create child spans linked via `parent_span_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpanContext {
    /// Unique span identifier
    pub span_id: String,

    /// Parent span ID (None for root spans)
    pub parent_span_id: Option<String>,

    /// Request-level identifier (same for all spans in a request)
    pub request_id: String,

    /// Span name (e.g., "GET /", "mongodb.update")
    pub name: String,

    pub kind: SpanKind,

    /// Start time (Unix milliseconds)
    pub start_time: u64,

    /// Custom attributes (JSON-serializable)
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl SpanContext {
    /// Create a new root span for an inbound request
    pub fn new_root(name: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
            request_id: request_id.into(),
            name: name.into(),
            kind: SpanKind::Server,
            start_time: current_millis(),
            attributes: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Create a child span inheriting `request_id` from parent
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self {
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: Some(self.span_id.clone()),
            request_id: self.request_id.clone(),
            name: name.into(),
            kind: SpanKind::Internal,
            start_time: current_millis(),
            attributes: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Create a child span for an outgoing client call
    pub fn child_client(&self, name: impl Into<String>) -> Self {
        let mut child = self.child(name);
        child.kind = SpanKind::Client;
        child
    }

    /// Create a client span with no parent, for calls made outside any request
    pub fn detached_client(name: impl Into<String>) -> Self {
        let mut span = Self::new_root(name, Uuid::new_v4().to_string());
        span.kind = SpanKind::Client;
        span
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        if let serde_json::Value::Object(ref mut map) = self.attributes {
            map.insert(key.into(), value.into());
        }
    }
}

/// Finished span as handed to a reporter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub request_id: String,
    pub name: String,
    pub kind: String,
    pub start_time: u64,
    pub end_time: u64,
    pub duration_ms: u64,
    pub status: String,
    pub attributes: serde_json::Value,
}

impl SpanRecord {
    /// Close a span with the given status ("ok" or "error")
    pub fn from_context(ctx: SpanContext, status: &str) -> Self {
        let end_time = current_millis();
        let duration_ms = end_time.saturating_sub(ctx.start_time);

        Self {
            span_id: ctx.span_id,
            parent_span_id: ctx.parent_span_id,
            request_id: ctx.request_id,
            name: ctx.name,
            kind: ctx.kind.as_str().to_string(),
            start_time: ctx.start_time,
            end_time,
            duration_ms,
            status: status.to_string(),
            attributes: ctx.attributes,
        }
    }
}

/// Run `fut` with `parent` as the current trace parent for this task.
pub async fn with_parent<F: Future>(parent: SpanContext, fut: F) -> F::Output {
    CURRENT_PARENT.scope(parent, fut).await
}

/// Trace parent installed by [`with_parent`], if any.
pub fn current_parent() -> Option<SpanContext> {
    CURRENT_PARENT.try_with(|span| span.clone()).ok()
}

/// Get current time as Unix milliseconds
pub fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
