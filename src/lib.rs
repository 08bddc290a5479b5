pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod liveness;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod render;
pub mod server;
pub mod signals;
pub mod store;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize tracing/logging
///
/// `RUST_LOG` takes precedence over the configured level. This function can
/// only be called once per process.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init(),
    }
}
