//! Server lifecycle: `Starting -> Ready -> Draining -> Stopped`.
//!
//! Liveness turns ready only once the listener is bound, and flips to
//! shutting down as soon as a shutdown signal arrives, before the drain
//! begins. The drain waits for in-flight requests, bounded by the drain
//! timeout.
//!
//! Connections are served one task each. Request headers must arrive within
//! the read timeout, and keep-alive connections with no request in flight
//! are closed after the idle timeout.

use axum::{extract::ConnectInfo, http::Request, Router};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::liveness::{Liveness, LivenessPhase};
use crate::signals::ShutdownSignal;

/// Pause after a failed accept (e.g. too many open files).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Ready,
    Draining,
    Stopped,
}

/// Per-connection timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Time allowed to receive a complete request head
    pub read_timeout: Duration,
    /// Time a connection may sit with no request in flight
    pub idle_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(15),
        }
    }
}

pub struct Lifecycle {
    liveness: Liveness,
    drain_timeout: Duration,
    limits: ConnectionLimits,
    phase: watch::Sender<Phase>,
}

impl Lifecycle {
    pub fn new(liveness: Liveness, drain_timeout: Duration) -> Self {
        let (phase, _) = watch::channel(Phase::Starting);
        Self {
            liveness,
            drain_timeout,
            limits: ConnectionLimits::default(),
            phase,
        }
    }

    pub fn with_connection_limits(mut self, limits: ConnectionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Observe phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Serve `app` on `listener` until a shutdown signal, then drain.
    ///
    /// Returns `Err(Fatal)` after draining when the signal was fatal and
    /// `Err(ShutdownTimeout)` when in-flight requests outlive the drain timeout.
    pub async fn run(
        self,
        listener: TcpListener,
        app: Router,
        shutdown: broadcast::Receiver<ShutdownSignal>,
    ) -> Result<(), AppError> {
        let addr = listener.local_addr().map_err(|e| AppError::Serve(e.to_string()))?;

        // Every connection task holds a `close_rx` clone; the drain is over
        // once all of them are dropped.
        let (close_tx, close_rx) = watch::channel(());
        let (stop_tx, stop_rx) = watch::channel(false);

        self.liveness.set(LivenessPhase::Ready);
        self.phase.send_replace(Phase::Ready);
        info!("Listening on {}", addr);

        let shutdown = wait_for_shutdown(shutdown);
        tokio::pin!(shutdown);

        let signal = loop {
            tokio::select! {
                signal = &mut shutdown => break signal,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => spawn_connection(
                        stream,
                        remote,
                        app.clone(),
                        self.limits,
                        stop_rx.clone(),
                        close_rx.clone(),
                    ),
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        };

        self.liveness.set(LivenessPhase::ShuttingDown);
        info!(?signal, "Shutdown signal received, draining connections...");
        drop(listener);
        self.phase.send_replace(Phase::Draining);

        let _ = stop_tx.send(true);
        drop(stop_rx);
        drop(close_rx);
        let drained = tokio::time::timeout(self.drain_timeout, close_tx.closed()).await;
        self.phase.send_replace(Phase::Stopped);

        if drained.is_err() {
            error!(
                timeout = ?self.drain_timeout,
                "In-flight requests did not finish before the drain timeout"
            );
            return Err(AppError::ShutdownTimeout(self.drain_timeout));
        }

        info!("Server stopped gracefully");
        outcome(signal)
    }
}

fn spawn_connection(
    stream: TcpStream,
    remote: SocketAddr,
    app: Router,
    limits: ConnectionLimits,
    mut stop: watch::Receiver<bool>,
    close: watch::Receiver<()>,
) {
    tokio::spawn(async move {
        let activity = Activity::new();
        let service = {
            let activity = activity.clone();
            hyper::service::service_fn(move |mut req: Request<Incoming>| {
                req.extensions_mut().insert(ConnectInfo(remote));
                let busy = activity.begin();
                let call = app.clone().oneshot(req);
                async move {
                    let response = call.await;
                    drop(busy);
                    response
                }
            })
        };

        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(limits.read_timeout);
        let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
        tokio::pin!(conn);

        let mut idle_check = tokio::time::interval((limits.idle_timeout / 4).clamp(
            Duration::from_millis(10),
            Duration::from_secs(1),
        ));
        let mut closing = false;

        loop {
            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!(%remote, "Connection closed with error: {}", e);
                    }
                    break;
                }
                _ = stop.changed(), if !closing => {
                    closing = true;
                    conn.as_mut().graceful_shutdown();
                }
                _ = idle_check.tick(), if !closing => {
                    if activity.idle_for() >= limits.idle_timeout {
                        debug!(%remote, "Closing idle connection");
                        closing = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
        }

        drop(close);
    });
}

/// Tracks whether a connection has a request in flight and when it last did.
#[derive(Clone)]
struct Activity {
    state: Arc<ActivityState>,
}

struct ActivityState {
    opened_at: Instant,
    in_flight: AtomicUsize,
    /// Milliseconds after `opened_at` when the last request finished
    last_active_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            state: Arc::new(ActivityState {
                opened_at: Instant::now(),
                in_flight: AtomicUsize::new(0),
                last_active_ms: AtomicU64::new(0),
            }),
        }
    }

    fn begin(&self) -> Busy {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        Busy(self.clone())
    }

    fn idle_for(&self) -> Duration {
        if self.state.in_flight.load(Ordering::SeqCst) > 0 {
            return Duration::ZERO;
        }
        let last = Duration::from_millis(self.state.last_active_ms.load(Ordering::SeqCst));
        self.state.opened_at.elapsed().saturating_sub(last)
    }
}

/// Held while a request is being served.
struct Busy(Activity);

impl Drop for Busy {
    fn drop(&mut self) {
        let state = &self.0.state;
        state
            .last_active_ms
            .store(state.opened_at.elapsed().as_millis() as u64, Ordering::SeqCst);
        state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn outcome(signal: ShutdownSignal) -> Result<(), AppError> {
    match signal {
        ShutdownSignal::Graceful => Ok(()),
        ShutdownSignal::Fatal(reason) => Err(AppError::Fatal(reason)),
    }
}

async fn wait_for_shutdown(mut shutdown: broadcast::Receiver<ShutdownSignal>) -> ShutdownSignal {
    loop {
        match shutdown.recv().await {
            Ok(signal) => return signal,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Shutdown receiver lagged");
            }
            // No sender left: nothing can ever ask us to stop.
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_activity_idle_only_without_requests() {
        let activity = Activity::new();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(activity.idle_for(), Duration::from_secs(3));

        let busy = activity.begin();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(activity.idle_for(), Duration::ZERO);

        drop(busy);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(activity.idle_for(), Duration::from_secs(2));
    }
}
