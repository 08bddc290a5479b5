use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;

use crate::store::StoreError;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
    /// Backing store unreachable at startup
    #[error("Store connection error: {0}")]
    StoreConnect(String),
    /// A store call exceeded its deadline
    #[error("Store operation timed out after {0:?}")]
    StoreTimeout(Duration),
    /// A store call failed
    #[error("Store failure: {0}")]
    StoreFailure(String),
    /// Template parsing or rendering failed
    #[error("Render error: {0}")]
    Render(String),
    /// Listener could not be bound
    #[error("Could not listen on {addr}: {reason}")]
    Bind { addr: String, reason: String },
    /// The HTTP server stopped with an I/O error
    #[error("Server error: {0}")]
    Serve(String),
    /// Graceful drain did not finish in time
    #[error("Could not gracefully shutdown the server within {0:?}")]
    ShutdownTimeout(Duration),
    /// Shutdown was requested because of an unrecoverable request failure
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::StoreConnect(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::StoreConnect(_) => "store_connect_error",
            Self::StoreTimeout(_) => "store_timeout",
            Self::StoreFailure(_) => "store_failure",
            Self::Render(_) => "render_error",
            Self::Bind { .. } => "bind_error",
            Self::Serve(_) => "serve_error",
            Self::ShutdownTimeout(_) => "shutdown_timeout",
            Self::Fatal(_) => "fatal",
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(after) => Self::StoreTimeout(after),
            StoreError::Failure(msg) => Self::StoreFailure(msg),
            StoreError::Connect(msg) => Self::StoreConnect(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.type_name(),
            }
        }));

        (self.status(), body).into_response()
    }
}
