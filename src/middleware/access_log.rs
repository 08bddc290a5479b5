use axum::{
    extract::{ConnectInfo, Request},
    http::{header::USER_AGENT, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};

use crate::context::RequestContext;

/// Emit one access log line per request.
pub async fn log_request(req: Request, next: Next) -> Response {
    let mut line = AccessLine {
        request_id: req
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.request_id.clone())
            .unwrap_or_else(|| "-".to_string()),
        method: req.method().clone(),
        path: req.uri().path().to_string(),
        remote_addr: req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_else(|| "-".to_string()),
        user_agent: req
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string(),
        started: Instant::now(),
        status: None,
    };

    let response = next.run(req).await;
    line.status = Some(response.status());
    response
}

/// Logged on drop, so a request whose handler never finished is still recorded.
struct AccessLine {
    request_id: String,
    method: Method,
    path: String,
    remote_addr: String,
    user_agent: String,
    started: Instant,
    status: Option<StatusCode>,
}

impl Drop for AccessLine {
    fn drop(&mut self) {
        let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        match self.status {
            Some(status) => info!(
                target: "access",
                request_id = %self.request_id,
                method = %self.method,
                path = %self.path,
                remote_addr = %self.remote_addr,
                user_agent = %self.user_agent,
                status = status.as_u16(),
                latency_ms,
                "request completed"
            ),
            None => warn!(
                target: "access",
                request_id = %self.request_id,
                method = %self.method,
                path = %self.path,
                remote_addr = %self.remote_addr,
                user_agent = %self.user_agent,
                latency_ms,
                "request aborted before completion"
            ),
        }
    }
}
