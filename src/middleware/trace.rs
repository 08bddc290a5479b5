use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::request_id::RequestId;
use tracing::{info_span, warn, Instrument};

use crate::context::RequestContext;
use crate::observability::{SpanContext, SpanRecord, SpanReporter};

/// State for the tracing decorator
#[derive(Clone)]
pub struct TraceState {
    pub reporter: Arc<dyn SpanReporter>,
    pub request_timeout: Duration,
}

/// Extra time a request gets past its deadline before the guard answers.
///
/// Store calls stop at the deadline itself, so their own error response wins.
pub const DEADLINE_GRACE: Duration = Duration::from_millis(50);

/// Open the root span for a request and publish the [`RequestContext`].
///
/// The span is named `"<METHOD> <path>"`, tagged with the HTTP method, path
/// and final status code, and reported once the response is produced. A
/// request dropped before responding is reported as `cancelled`.
pub async fn trace_request(State(state): State<TraceState>, mut req: Request, next: Next) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("-")
        .to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut ctx = RequestContext::new(
        request_id.clone(),
        format!("{} {}", method, path),
        state.request_timeout,
    );
    ctx.span.set_attribute("http.method", method.as_str());
    ctx.span.set_attribute("http.path", path.as_str());
    req.extensions_mut().insert(ctx.clone());

    let root = RootSpan {
        reporter: state.reporter.clone(),
        span: Some(ctx.span),
    };

    let span = info_span!("http_request", request_id = %request_id, method = %method, path = %path);
    let response = next.run(req).instrument(span).await;

    root.finish(response.status());
    response
}

/// Root span of an in-flight request; reported exactly once.
struct RootSpan {
    reporter: Arc<dyn SpanReporter>,
    span: Option<SpanContext>,
}

impl RootSpan {
    fn finish(mut self, status: StatusCode) {
        if let Some(mut span) = self.span.take() {
            span.set_attribute("http.status_code", status.as_u16());
            let outcome = if status.is_server_error() { "error" } else { "ok" };
            self.reporter.report(SpanRecord::from_context(span, outcome));
        }
    }
}

impl Drop for RootSpan {
    fn drop(&mut self) {
        if let Some(span) = self.span.take() {
            self.reporter.report(SpanRecord::from_context(span, "cancelled"));
        }
    }
}

/// Fail the request with 503 once its deadline (plus [`DEADLINE_GRACE`]) passes.
pub async fn enforce_deadline(req: Request, next: Next) -> Response {
    let Some(deadline) = req.extensions().get::<RequestContext>().map(|ctx| ctx.deadline) else {
        return next.run(req).await;
    };

    match tokio::time::timeout_at(deadline + DEADLINE_GRACE, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("request deadline exceeded");
            (StatusCode::SERVICE_UNAVAILABLE, "request deadline exceeded").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Extension, Router};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct Collect(Mutex<Vec<SpanRecord>>);

    impl SpanReporter for Collect {
        fn report(&self, record: SpanRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    fn app(reporter: Arc<Collect>, request_timeout: Duration) -> Router {
        Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .route(
                "/ctx",
                get(|Extension(ctx): Extension<RequestContext>| async move { ctx.request_id }),
            )
            .layer(middleware::from_fn(enforce_deadline))
            .layer(middleware::from_fn_with_state(
                TraceState {
                    reporter,
                    request_timeout,
                },
                trace_request,
            ))
    }

    #[tokio::test]
    async fn test_context_available_to_handlers() {
        let reporter = Arc::new(Collect::default());
        let mut req = axum::http::Request::builder()
            .uri("/ctx")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(RequestId::new(axum::http::HeaderValue::from_static("42")));

        let response = app(reporter.clone(), Duration::from_secs(1))
            .oneshot(req)
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"42");

        let records = reporter.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "GET /ctx");
        assert_eq!(records[0].attributes["http.method"], "GET");
        assert_eq!(records[0].attributes["http.path"], "/ctx");
        assert_eq!(records[0].status, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_is_503() {
        let reporter = Arc::new(Collect::default());
        let req = axum::http::Request::builder()
            .uri("/slow")
            .body(Body::empty())
            .unwrap();

        let response = app(reporter.clone(), Duration::from_millis(100))
            .oneshot(req)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let records = reporter.0.lock().unwrap();
        assert_eq!(records[0].status, "error");
        assert_eq!(records[0].attributes["http.status_code"], 503);
    }
}
