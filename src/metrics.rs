use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use std::time::Duration;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const STORE_OPERATIONS_TOTAL: &str = "store_operations_total";
pub const STORE_OPERATION_DURATION: &str = "store_operation_duration_seconds";

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(HTTP_REQUEST_DURATION.to_string()), LATENCY_BUCKETS)?
        .set_buckets_for_metric(Matcher::Full(STORE_OPERATION_DURATION.to_string()), LATENCY_BUCKETS)
}

/// Build the Prometheus recorder without installing it globally
pub fn build_recorder() -> Result<PrometheusRecorder, BuildError> {
    Ok(builder()?.build_recorder())
}

/// Install the Prometheus recorder as the global metrics recorder
///
/// Fails if a recorder is already installed (e.g., in tests).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = builder()?.install_recorder()?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests");
    describe_gauge!(HTTP_REQUESTS_IN_FLIGHT, "HTTP requests currently being served");
    describe_histogram!(HTTP_REQUEST_DURATION, "HTTP request latency in seconds");
    describe_counter!(STORE_OPERATIONS_TOTAL, "Counter store operations by outcome");
    describe_histogram!(STORE_OPERATION_DURATION, "Counter store operation latency in seconds");
    describe_gauge!("visit_counter_info", "Service version information");

    gauge!("visit_counter_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Track one in-flight request; the gauge is decremented on drop
pub struct InFlight {
    route: String,
    method: String,
}

impl InFlight {
    pub fn start(route: &str, method: &str) -> Self {
        gauge!(
            HTTP_REQUESTS_IN_FLIGHT,
            "route" => route.to_string(),
            "method" => method.to_string(),
        )
        .increment(1.0);
        Self {
            route: route.to_string(),
            method: method.to_string(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        gauge!(
            HTTP_REQUESTS_IN_FLIGHT,
            "route" => self.route.clone(),
            "method" => self.method.clone(),
        )
        .decrement(1.0);
    }
}

/// Record a completed request
pub fn record_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status = status.to_string();
    counter!(
        HTTP_REQUESTS_TOTAL,
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status.clone(),
    )
    .increment(1);
    histogram!(
        HTTP_REQUEST_DURATION,
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status,
    )
    .record(duration.as_secs_f64());
}

/// Record a counter store operation
pub fn record_store_operation(operation: &'static str, outcome: &'static str, duration: Duration) {
    counter!(
        STORE_OPERATIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome,
    )
    .increment(1);
    histogram!(STORE_OPERATION_DURATION, "operation" => operation).record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_are_rendered() {
        let recorder = build_recorder().unwrap();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_request("/", "GET", 200, Duration::from_millis(12));
            let _in_flight = InFlight::start("/healthz", "GET");
            record_store_operation("increment", "ok", Duration::from_millis(3));
        });

        let rendered = handle.render();
        assert!(rendered.contains("http_requests_total{"));
        assert!(rendered.contains(r#"status="200""#));
        assert!(rendered.contains("http_request_duration_seconds_bucket"));
        assert!(rendered.contains("http_requests_in_flight{"));
        assert!(rendered.contains(r#"outcome="ok""#));
    }
}
