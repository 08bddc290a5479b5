//! Per-request context carried through the middleware chain.

use std::time::Duration;
use tokio::time::Instant;

use crate::observability::SpanContext;

/// Request identifier, deadline and root span for one inbound request.
///
/// Created by the tracing middleware and stored in request extensions;
/// handlers pass it down to the counter store.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub deadline: Instant,
    pub span: SpanContext,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, span_name: impl Into<String>, timeout: Duration) -> Self {
        let request_id = request_id.into();
        Self {
            span: SpanContext::new_root(span_name, request_id.clone()),
            request_id,
            deadline: Instant::now() + timeout,
        }
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
