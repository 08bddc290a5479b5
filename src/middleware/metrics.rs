use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics::{self, InFlight};

/// Route label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Record request count, latency and in-flight gauge per route template.
pub async fn record_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());
    let method = req.method().to_string();

    let _in_flight = InFlight::start(&route, &method);
    let started = Instant::now();
    let response = next.run(req).await;
    metrics::record_request(&route, &method, response.status().as_u16(), started.elapsed());

    response
}
