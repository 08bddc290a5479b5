use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower_http::request_id::{MakeRequestId, RequestId};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generates request ids from the wall clock in nanoseconds.
///
/// Ids are decimal strings and strictly increasing within the process, even
/// when two requests arrive in the same nanosecond or the clock steps back.
#[derive(Debug, Clone, Default)]
pub struct TimestampRequestId {
    last: Arc<AtomicU64>,
}

impl TimestampRequestId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| Some(now.max(prev + 1)))
        {
            Ok(prev) | Err(prev) => now.max(prev + 1),
        }
    }
}

impl MakeRequestId for TimestampRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&self.next_id().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Remove an `X-Request-Id` that is empty or not visible ASCII so that one
/// gets generated instead.
pub async fn strip_unusable_request_id(mut req: Request, next: Next) -> Response {
    let unusable = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .is_some_and(|value| value.to_str().map_or(true, |id| id.trim().is_empty()));
    if unusable {
        req.headers_mut().remove(REQUEST_ID_HEADER);
    }
    next.run(req).await
}
