//! Persistent visit counter.
//!
//! [`CounterStore`] owns the single counter document. It lazily resolves the
//! document handle from a [`CounterBackend`] on first use and bounds every
//! backend call by the request deadline.

pub mod memory;
pub mod mongo;
pub mod tracer;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::StoreConfig;
use crate::context::RequestContext;
use crate::metrics;
use crate::observability::span;

pub use memory::MemoryBackend;
pub use mongo::MongoBackend;
pub use tracer::{CommandListener, StoreTracer};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Failure(String),
    #[error("{0}")]
    Connect(String),
}

/// Counter storage model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    pub count: i64,
}

/// Address of the counter document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterTarget {
    pub database: String,
    pub collection: String,
    pub document_id: String,
}

impl From<&StoreConfig> for CounterTarget {
    fn from(cfg: &StoreConfig) -> Self {
        Self {
            database: cfg.database.clone(),
            collection: cfg.collection.clone(),
            document_id: cfg.document_id.clone(),
        }
    }
}

/// A document store able to host the counter.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Check connectivity; used once at startup.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Resolve a handle to the counter document.
    async fn open(&self, target: &CounterTarget) -> Result<Arc<dyn CounterDocument>, StoreError>;
}

/// Handle to the single counter document.
#[async_trait]
pub trait CounterDocument: Send + Sync {
    /// Add one to `count`, creating the document with `count = 1` if absent.
    async fn increment(&self) -> Result<(), StoreError>;

    async fn read(&self) -> Result<Counter, StoreError>;
}

pub struct CounterStore {
    backend: Arc<dyn CounterBackend>,
    target: CounterTarget,
    operation_timeout: Duration,
    document: OnceCell<Arc<dyn CounterDocument>>,
}

impl CounterStore {
    pub fn new(backend: Arc<dyn CounterBackend>, target: CounterTarget, operation_timeout: Duration) -> Self {
        Self {
            backend,
            target,
            operation_timeout,
            document: OnceCell::new(),
        }
    }

    /// Record one visit and return the counter as read back afterwards.
    ///
    /// The read always observes this call's own increment; concurrent
    /// increments from other requests may be reflected as well.
    pub async fn increment_and_read(&self, ctx: &RequestContext) -> Result<Counter, StoreError> {
        let document = self
            .document
            .get_or_try_init(|| async {
                debug!(
                    database = %self.target.database,
                    collection = %self.target.collection,
                    document_id = %self.target.document_id,
                    "resolving counter document"
                );
                self.backend.open(&self.target).await
            })
            .await?
            .clone();

        self.bounded("increment", ctx, document.increment()).await?;
        let counter = self.bounded("read", ctx, document.read()).await?;

        debug!(request_id = %ctx.request_id, count = counter.count, "counter updated");
        Ok(counter)
    }

    async fn bounded<T, F>(&self, operation: &'static str, ctx: &RequestContext, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let budget = self.operation_timeout.min(ctx.remaining());
        let started = Instant::now();

        let result = if budget.is_zero() {
            Err(StoreError::Timeout(budget))
        } else {
            match tokio::time::timeout(budget, span::with_parent(ctx.span.clone(), call)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(budget)),
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(StoreError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        metrics::record_store_operation(operation, outcome, started.elapsed());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn target() -> CounterTarget {
        CounterTarget {
            database: "test".to_string(),
            collection: "counter".to_string(),
            document_id: "DECAFBAD".to_string(),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("1", "GET /", Duration::from_secs(10))
    }

    struct CountingOpens {
        inner: MemoryBackend,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl CounterBackend for CountingOpens {
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn open(&self, target: &CounterTarget) -> Result<Arc<dyn CounterDocument>, StoreError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.open(target).await
        }
    }

    #[tokio::test]
    async fn test_first_increment_creates_document() {
        let backend = MemoryBackend::new();
        let store = CounterStore::new(Arc::new(backend.clone()), target(), Duration::from_secs(3));

        assert_eq!(backend.count(&target()), None);
        let counter = store.increment_and_read(&ctx()).await.unwrap();
        assert_eq!(counter.count, 1);
        assert_eq!(backend.count(&target()), Some(1));
    }

    #[tokio::test]
    async fn test_increment_builds_on_existing_count() {
        let backend = MemoryBackend::new();
        backend.seed(&target(), 40);
        let store = CounterStore::new(Arc::new(backend), target(), Duration::from_secs(3));

        assert_eq!(store.increment_and_read(&ctx()).await.unwrap().count, 41);
    }

    #[tokio::test]
    async fn test_document_resolved_once_under_concurrency() {
        let backend = Arc::new(CountingOpens {
            inner: MemoryBackend::new(),
            opens: AtomicUsize::new(0),
        });
        let store = Arc::new(CounterStore::new(backend.clone(), target(), Duration::from_secs(3)));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment_and_read(&ctx()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_read_includes_its_own_increment() {
        let backend = MemoryBackend::new().with_latency(Duration::from_millis(1));
        backend.seed(&target(), 100);
        let store = Arc::new(CounterStore::new(
            Arc::new(backend.clone()),
            target(),
            Duration::from_secs(3),
        ));

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment_and_read(&ctx()).await })
            })
            .collect();
        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().unwrap().count);
        }

        assert!(counts.iter().all(|&count| count >= 101));
        assert_eq!(counts.iter().max(), Some(&125));
        assert_eq!(backend.count(&target()), Some(125));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out() {
        let backend = MemoryBackend::new().with_latency(Duration::from_secs(5));
        let store = CounterStore::new(Arc::new(backend), target(), Duration::from_secs(3));

        let err = store.increment_and_read(&ctx()).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(d) if d == Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_capped_by_request_deadline() {
        let backend = MemoryBackend::new().with_latency(Duration::from_secs(2));
        let store = CounterStore::new(Arc::new(backend), target(), Duration::from_secs(3));
        let ctx = RequestContext::new("1", "GET /", Duration::from_secs(1));

        let err = store.increment_and_read(&ctx).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_fails_without_calling_backend() {
        let backend = MemoryBackend::new();
        let store = CounterStore::new(Arc::new(backend.clone()), target(), Duration::from_secs(3));
        let ctx = RequestContext::new("1", "GET /", Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(20)).await;

        assert!(matches!(
            store.increment_and_read(&ctx).await,
            Err(StoreError::Timeout(_))
        ));
        assert_eq!(backend.count(&target()), None);
    }
}
