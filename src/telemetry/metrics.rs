use hyper::{Method, StatusCode};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::balancer::Backend;

/// Default latency buckets for `spindle_response_time_seconds`.
const RESPONSE_TIME_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder and return the render handle. Safe to
/// call more than once; later calls return the same handle.
pub fn install() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| {
            let builder = PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full("spindle_response_time_seconds".to_string()),
                    RESPONSE_TIME_BUCKETS,
                )
                .unwrap_or_else(|_| PrometheusBuilder::new());

            let recorder = builder.build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                debug!("global metrics recorder already installed");
            }
            handle
        })
        .clone()
}

/// One completed (or failed) proxied request.
pub fn record_request(backend: &str, status: StatusCode, method: &Method, elapsed: Duration) {
    let labels = [
        ("backend", backend.to_string()),
        ("status_code", status.as_u16().to_string()),
        ("method", method.to_string()),
    ];
    metrics::counter!("spindle_request_total", &labels).increment(1);
    metrics::histogram!("spindle_response_time_seconds", &labels).record(elapsed.as_secs_f64());
}

/// One request-path error, labeled by kind.
pub fn record_error(backend: &str, error_type: &str) {
    let labels = [
        ("backend", backend.to_string()),
        ("error_type", error_type.to_string()),
    ];
    metrics::counter!("spindle_request_errors_total", &labels).increment(1);
}

/// Refresh the per-backend gauges from a pool snapshot.
pub fn update_backend_status(backends: &[Arc<Backend>]) {
    for backend in backends {
        let status_labels = [
            ("backend", backend.addr().to_string()),
            ("url", backend.url().to_string()),
        ];
        metrics::gauge!("spindle_backend_status", &status_labels)
            .set(if backend.is_alive() { 1.0 } else { 0.0 });

        let connection_labels = [("backend", backend.addr().to_string())];
        metrics::gauge!("spindle_active_connections", &connection_labels)
            .set(backend.connections() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        let first = install();
        let second = install();
        // Both handles render from the same recorder.
        record_error("127.0.0.1:9001", "backend_timeout");
        let rendered = first.render();
        let rendered_again = second.render();
        assert_eq!(rendered.is_empty(), rendered_again.is_empty());
    }

    #[test]
    fn test_recording_exports_metrics() {
        let handle = install();

        record_request(
            "127.0.0.1:9001",
            StatusCode::OK,
            &Method::GET,
            Duration::from_millis(12),
        );
        record_error("127.0.0.1:9001", "backend_transport");

        let backend = Arc::new(Backend::new("http://127.0.0.1:9001", 1, None).unwrap());
        backend.incr_conn();
        update_backend_status(&[backend]);

        let rendered = handle.render();
        assert!(rendered.contains("spindle_request_total"));
        assert!(rendered.contains("spindle_response_time_seconds"));
        assert!(rendered.contains("spindle_request_errors_total"));
        assert!(rendered.contains("spindle_backend_status"));
        assert!(rendered.contains("spindle_active_connections"));
    }
}
