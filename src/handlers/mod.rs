//! HTTP handlers and the state they share.

pub mod health;
pub mod index;
pub mod metrics_handler;

use axum::{extract::FromRef, http::StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

use crate::context::RequestContext;
use crate::error::AppError;
use crate::liveness::Liveness;
use crate::render::PageTemplate;
use crate::signals::ShutdownSignal;
use crate::store::CounterStore;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub liveness: Liveness,
    /// `None` when persistence is disabled
    pub counter: Option<Arc<CounterStore>>,
    pub template: Arc<PageTemplate>,
    pub hostname: Arc<str>,
    pub metrics: Arc<PrometheusHandle>,
    /// Set in strict mode; request failures then stop the process.
    pub fatal: Option<broadcast::Sender<ShutdownSignal>>,
}

impl AppState {
    /// Log a failed request and, in strict mode, request a fatal shutdown.
    pub fn request_failed(&self, ctx: &RequestContext, err: AppError) -> AppError {
        error!(request_id = %ctx.request_id, error_type = err.type_name(), "request failed: {}", err);
        if let Some(fatal) = &self.fatal {
            let _ = fatal.send(ShutdownSignal::Fatal(err.to_string()));
        }
        err
    }
}

/// Fallback for unknown paths
pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
