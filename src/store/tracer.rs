//! Span-per-command tracing for the backing store.
//!
//! Backends report every command as a started event followed by exactly one
//! succeeded or failed event carrying the same correlation id. The tracer
//! keeps the open span in a concurrent map between the two.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::observability::{SpanContext, SpanRecord, SpanReporter};

#[derive(Debug, Clone)]
pub struct CommandStarted {
    pub correlation_id: i64,
    pub command_name: String,
    pub database: String,
    /// Redacted summary of the command document
    pub statement: String,
    pub connection_id: String,
}

#[derive(Debug, Clone)]
pub struct CommandSucceeded {
    pub correlation_id: i64,
    /// Redacted summary of the reply document
    pub reply: String,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct CommandFailed {
    pub correlation_id: i64,
    pub failure: String,
    pub duration: Duration,
}

/// Receiver for backing-store command events.
pub trait CommandListener: Send + Sync {
    fn on_call_started(&self, parent: Option<&SpanContext>, event: CommandStarted);
    fn on_call_succeeded(&self, event: CommandSucceeded);
    fn on_call_failed(&self, event: CommandFailed);
}

struct PendingSpan {
    span: SpanContext,
    opened_at: Instant,
}

pub struct StoreTracer {
    system: &'static str,
    reporter: Arc<dyn SpanReporter>,
    pending: DashMap<i64, PendingSpan>,
}

impl StoreTracer {
    /// `system` names the store in span names and the `db.type` tag, e.g. "mongodb".
    pub fn new(system: &'static str, reporter: Arc<dyn SpanReporter>) -> Self {
        Self {
            system,
            reporter,
            pending: DashMap::new(),
        }
    }

    /// Number of spans started but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Fail every span that has been open longer than `max_age`.
    ///
    /// Commands whose caller was cancelled mid-flight may never produce a
    /// finishing event; this closes them. Returns how many were reaped.
    pub fn reap_abandoned(&self, max_age: Duration) -> usize {
        let stale: Vec<i64> = self
            .pending
            .iter()
            .filter(|entry| entry.value().opened_at.elapsed() >= max_age)
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for correlation_id in stale {
            if let Some((_, pending)) = self.pending.remove(&correlation_id) {
                let duration = pending.opened_at.elapsed();
                self.finish_failed(pending.span, "abandoned", duration);
                reaped += 1;
            }
        }
        reaped
    }

    fn finish_failed(&self, mut span: SpanContext, failure: &str, duration: Duration) {
        span.set_attribute("error", true);
        span.set_attribute(format!("{}.duration_ms", self.system), duration.as_millis() as u64);
        span.set_attribute(format!("{}.failure", self.system), failure);
        self.reporter.report(SpanRecord::from_context(span, "error"));
    }
}

impl CommandListener for StoreTracer {
    fn on_call_started(&self, parent: Option<&SpanContext>, event: CommandStarted) {
        let name = format!("{}.{}", self.system, event.command_name);
        let mut span = match parent {
            Some(parent) => parent.child_client(name),
            None => SpanContext::detached_client(name),
        };
        span.set_attribute("db.type", self.system);
        span.set_attribute("db.instance", event.database);
        span.set_attribute("db.statement", event.statement);
        span.set_attribute("db.host", event.connection_id);
        span.set_attribute("span.kind", "client");
        span.set_attribute("component", "visit-counter-store");

        let previous = self.pending.insert(
            event.correlation_id,
            PendingSpan {
                span,
                opened_at: Instant::now(),
            },
        );
        if let Some(previous) = previous {
            // Correlation id reused before the earlier call finished.
            let duration = previous.opened_at.elapsed();
            self.finish_failed(previous.span, "superseded", duration);
        }
    }

    fn on_call_succeeded(&self, event: CommandSucceeded) {
        let Some((_, pending)) = self.pending.remove(&event.correlation_id) else {
            debug!(correlation_id = event.correlation_id, "succeeded event for unknown store span");
            return;
        };
        let mut span = pending.span;
        span.set_attribute(format!("{}.reply", self.system), event.reply);
        span.set_attribute(
            format!("{}.duration_ms", self.system),
            event.duration.as_millis() as u64,
        );
        self.reporter.report(SpanRecord::from_context(span, "ok"));
    }

    fn on_call_failed(&self, event: CommandFailed) {
        let Some((_, pending)) = self.pending.remove(&event.correlation_id) else {
            debug!(correlation_id = event.correlation_id, "failed event for unknown store span");
            return;
        };
        self.finish_failed(pending.span, &event.failure, event.duration);
    }
}

/// Periodically reap spans left open by cancelled store calls.
pub fn spawn_reaper(tracer: Arc<StoreTracer>, interval: Duration, max_age: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let reaped = tracer.reap_abandoned(max_age);
            if reaped > 0 {
                tracing::warn!(reaped, "closed abandoned store spans");
            }
        }
    })
}
