use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{info, warn};

use crate::{
    config::{Config, StoreBackendKind, StoreConfig},
    error::AppError,
    handlers::{self, AppState},
    lifecycle::{ConnectionLimits, Lifecycle},
    liveness::Liveness,
    metrics,
    middleware::{access_log, metrics as request_metrics, request_id, trace, TimestampRequestId, TraceState},
    observability::{LogReporter, SpanReporter},
    render::PageTemplate,
    signals::setup_signal_handlers,
    store::{self, CommandListener, CounterBackend, CounterStore, CounterTarget, MemoryBackend, MongoBackend, StoreTracer},
};

/// How often abandoned store spans are swept.
const REAPER_INTERVAL: Duration = Duration::from_secs(30);

/// Start the visit counter server
///
/// This function:
/// 1. Initializes metrics and the span reporter
/// 2. Connects the counter store when persistence is enabled
/// 3. Sets up signal handlers for graceful shutdown
/// 4. Binds to the configured address
/// 5. Serves requests until shutdown, then drains
pub async fn start_server(config: Config) -> Result<(), AppError> {
    info!("Initializing Prometheus metrics...");
    let metrics_handle = Arc::new(
        metrics::init_metrics().map_err(|e| AppError::Config(format!("metrics: {}", e)))?,
    );

    let reporter: Arc<dyn SpanReporter> = Arc::new(LogReporter::new(config.tracing.service_name.clone()));

    let template = match &config.server.template_path {
        Some(path) => PageTemplate::from_file(path)?,
        None => PageTemplate::embedded()?,
    };

    let counter = if config.store.enabled {
        Some(Arc::new(connect_store(&config.store, reporter.clone()).await?))
    } else {
        info!("Persistence disabled, the landing page will always show 0");
        None
    };

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let shutdown_rx = shutdown_tx.subscribe();

    let liveness = Liveness::new();
    let state = AppState {
        liveness: liveness.clone(),
        counter,
        template: Arc::new(template),
        hostname: Arc::from(resolve_hostname()),
        metrics: metrics_handle,
        fatal: config.server.strict.then(|| shutdown_tx.clone()),
    };
    let trace_state = TraceState {
        reporter,
        request_timeout: config.server.request_timeout(),
    };
    let app = create_router(state, trace_state);

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| AppError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;

    info!("Starting visit counter on {}", addr);
    let limits = ConnectionLimits {
        read_timeout: config.server.read_timeout(),
        idle_timeout: config.server.idle_timeout(),
    };
    let result = Lifecycle::new(liveness, config.server.drain_timeout())
        .with_connection_limits(limits)
        .run(listener, app, shutdown_rx)
        .await;

    signal_handle.abort();
    result
}

/// Create the Axum router with all routes and the request pipeline
pub fn create_router(state: AppState, trace_state: TraceState) -> Router {
    let pipeline = ServiceBuilder::new()
        .layer(middleware::from_fn(request_id::strip_unusable_request_id))
        .layer(SetRequestIdLayer::x_request_id(TimestampRequestId::new()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(middleware::from_fn_with_state(trace_state, trace::trace_request))
        .layer(middleware::from_fn(access_log::log_request))
        .layer(middleware::from_fn(request_metrics::record_metrics))
        .layer(middleware::from_fn(trace::enforce_deadline));

    Router::new()
        .route("/", get(handlers::index::index))
        .route("/healthz", get(handlers::health::healthz))
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(pipeline)
}

/// Connect the configured backend and verify it answers within the connect timeout.
pub async fn connect_store(cfg: &StoreConfig, reporter: Arc<dyn SpanReporter>) -> Result<CounterStore, AppError> {
    let backend: Arc<dyn CounterBackend> = match cfg.backend {
        StoreBackendKind::Mongodb => {
            let tracer = Arc::new(StoreTracer::new("mongodb", reporter));
            spawn_reaper(&tracer, cfg);
            let listener: Arc<dyn CommandListener> = tracer;
            Arc::new(MongoBackend::connect(&cfg.uri, cfg.connect_timeout(), Some(listener)).await?)
        }
        StoreBackendKind::Memory => {
            let tracer = Arc::new(StoreTracer::new("memory", reporter));
            spawn_reaper(&tracer, cfg);
            Arc::new(MemoryBackend::new().with_listener(tracer))
        }
    };

    match tokio::time::timeout(cfg.connect_timeout(), backend.ping()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(AppError::StoreConnect(format!(
                "no answer from {} within {:?}",
                store::mongo::redact_uri(&cfg.uri),
                cfg.connect_timeout()
            )))
        }
    }
    info!(
        backend = ?cfg.backend,
        uri = %store::mongo::redact_uri(&cfg.uri),
        database = %cfg.database,
        collection = %cfg.collection,
        "Connected to counter store"
    );

    Ok(CounterStore::new(backend, CounterTarget::from(cfg), cfg.operation_timeout()))
}

fn spawn_reaper(tracer: &Arc<StoreTracer>, cfg: &StoreConfig) {
    // A span still open after several operation timeouts will never finish.
    let max_age = (cfg.operation_timeout() * 4).max(Duration::from_secs(60));
    store::tracer::spawn_reaper(tracer.clone(), REAPER_INTERVAL, max_age);
}

fn resolve_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Could not resolve hostname: {}", e);
            "unknown".to_string()
        }
    }
}
