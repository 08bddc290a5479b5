//! In-process counter backend.
//!
//! Keeps documents in a `DashMap` and reports the same command events as the
//! MongoDB backend, so tracing and metrics behave identically in local runs.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::tracer::{CommandFailed, CommandListener, CommandStarted, CommandSucceeded};
use super::{Counter, CounterBackend, CounterDocument, CounterTarget, StoreError};
use crate::observability::span;

const CONNECTION_ID: &str = "memory#0";

#[derive(Clone, Default)]
pub struct MemoryBackend {
    documents: Arc<DashMap<CounterTarget, i64>>,
    listener: Option<Arc<dyn CommandListener>>,
    latency: Duration,
    next_request_id: Arc<AtomicI64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn CommandListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Delay every command by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn count(&self, target: &CounterTarget) -> Option<i64> {
        self.documents.get(target).map(|entry| *entry.value())
    }

    pub fn seed(&self, target: &CounterTarget, count: i64) {
        self.documents.insert(target.clone(), count);
    }
}

#[async_trait]
impl CounterBackend for MemoryBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn open(&self, target: &CounterTarget) -> Result<Arc<dyn CounterDocument>, StoreError> {
        Ok(Arc::new(MemoryDocument {
            backend: self.clone(),
            target: target.clone(),
        }))
    }
}

struct MemoryDocument {
    backend: MemoryBackend,
    target: CounterTarget,
}

impl MemoryDocument {
    fn start(&self, command_name: &str, statement: serde_json::Value) -> CommandCall {
        let correlation_id = self.backend.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(listener) = &self.backend.listener {
            let parent = span::current_parent();
            listener.on_call_started(
                parent.as_ref(),
                CommandStarted {
                    correlation_id,
                    command_name: command_name.to_string(),
                    database: self.target.database.clone(),
                    statement: statement.to_string(),
                    connection_id: CONNECTION_ID.to_string(),
                },
            );
        }
        CommandCall {
            listener: self.backend.listener.clone(),
            correlation_id,
            started: Instant::now(),
            finished: false,
        }
    }

    async fn simulate_latency(&self) {
        if !self.backend.latency.is_zero() {
            tokio::time::sleep(self.backend.latency).await;
        }
    }
}

#[async_trait]
impl CounterDocument for MemoryDocument {
    async fn increment(&self) -> Result<(), StoreError> {
        let call = self.start(
            "update",
            json!({ "update": self.target.collection, "updates": "?", "ordered": "?" }),
        );
        self.simulate_latency().await;

        let mut created = false;
        self.backend
            .documents
            .entry(self.target.clone())
            .and_modify(|count| *count += 1)
            .or_insert_with(|| {
                created = true;
                1
            });

        let reply = if created {
            json!({ "n": 1, "nModified": 0, "upserted": "?", "ok": 1 })
        } else {
            json!({ "n": 1, "nModified": 1, "ok": 1 })
        };
        call.succeed(reply.to_string());
        Ok(())
    }

    async fn read(&self) -> Result<Counter, StoreError> {
        let call = self.start(
            "find",
            json!({ "find": self.target.collection, "filter": "?", "limit": "?" }),
        );
        self.simulate_latency().await;

        match self.backend.count(&self.target) {
            Some(count) => {
                call.succeed(json!({ "cursor": "?", "ok": 1 }).to_string());
                Ok(Counter { count })
            }
            None => {
                let reason = format!("counter document '{}' not found", self.target.document_id);
                call.fail(reason.clone());
                Err(StoreError::Failure(reason))
            }
        }
    }
}

/// In-flight command; reports exactly one finishing event.
struct CommandCall {
    listener: Option<Arc<dyn CommandListener>>,
    correlation_id: i64,
    started: Instant,
    finished: bool,
}

impl CommandCall {
    fn succeed(mut self, reply: String) {
        self.finished = true;
        if let Some(listener) = &self.listener {
            listener.on_call_succeeded(CommandSucceeded {
                correlation_id: self.correlation_id,
                reply,
                duration: self.started.elapsed(),
            });
        }
    }

    fn fail(mut self, failure: String) {
        self.finished = true;
        self.report_failure(failure);
    }

    fn report_failure(&self, failure: String) {
        if let Some(listener) = &self.listener {
            listener.on_call_failed(CommandFailed {
                correlation_id: self.correlation_id,
                failure,
                duration: self.started.elapsed(),
            });
        }
    }
}

impl Drop for CommandCall {
    fn drop(&mut self) {
        if !self.finished {
            self.report_failure("cancelled".to_string());
        }
    }
}
