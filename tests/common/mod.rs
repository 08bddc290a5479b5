//! Shared fixtures for integration tests
#![allow(dead_code)]

use axum::{body::to_bytes, response::Response, Router};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use visit_counter::{
    handlers::AppState,
    liveness::{Liveness, LivenessPhase},
    metrics::build_recorder,
    middleware::TraceState,
    observability::{SpanRecord, SpanReporter},
    render::PageTemplate,
    server::create_router,
    signals::ShutdownSignal,
    store::{CounterStore, CounterTarget, MemoryBackend, StoreTracer},
};

/// Span reporter that keeps every record
#[derive(Default)]
pub struct Collect(pub Mutex<Vec<SpanRecord>>);

impl SpanReporter for Collect {
    fn report(&self, record: SpanRecord) {
        self.0.lock().unwrap().push(record);
    }
}

impl Collect {
    pub fn records(&self) -> Vec<SpanRecord> {
        self.0.lock().unwrap().clone()
    }
}

pub fn target() -> CounterTarget {
    CounterTarget {
        database: "test".to_string(),
        collection: "counter".to_string(),
        document_id: "DECAFBAD".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub persistence: bool,
    pub seed: Option<i64>,
    pub latency: Duration,
    pub operation_timeout: Duration,
    pub request_timeout: Duration,
    pub strict: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            persistence: true,
            seed: None,
            latency: Duration::ZERO,
            operation_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
            strict: false,
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub liveness: Liveness,
    pub backend: MemoryBackend,
    pub spans: Arc<Collect>,
    pub shutdown: broadcast::Sender<ShutdownSignal>,
}

/// Full router over an in-memory store; liveness starts out ready.
pub fn build_app(opts: AppOptions) -> TestApp {
    let spans = Arc::new(Collect::default());
    let tracer = Arc::new(StoreTracer::new("memory", spans.clone()));
    let backend = MemoryBackend::new()
        .with_listener(tracer)
        .with_latency(opts.latency);
    if let Some(seed) = opts.seed {
        backend.seed(&target(), seed);
    }

    let counter = opts.persistence.then(|| {
        Arc::new(CounterStore::new(
            Arc::new(backend.clone()),
            target(),
            opts.operation_timeout,
        ))
    });

    let liveness = Liveness::new();
    liveness.set(LivenessPhase::Ready);
    let (shutdown, _) = broadcast::channel(4);

    let state = AppState {
        liveness: liveness.clone(),
        counter,
        template: Arc::new(PageTemplate::embedded().unwrap()),
        hostname: Arc::from("test-host"),
        metrics: Arc::new(build_recorder().unwrap().handle()),
        fatal: opts.strict.then(|| shutdown.clone()),
    };
    let router = create_router(
        state,
        TraceState {
            reporter: spans.clone(),
            request_timeout: opts.request_timeout,
        },
    );

    TestApp {
        router,
        liveness,
        backend,
        spans,
        shutdown,
    }
}

pub async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn count_marker(count: i64) -> String {
    format!(r#"<div class="count">{}</div>"#, count)
}
