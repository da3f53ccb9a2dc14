use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::balancer::{Backend, BackendStatus};

/// Point-in-time view of one backend in the status report.
#[derive(Debug, Clone, Serialize)]
pub struct BackendReport {
    pub url: String,
    pub status: String,
    pub active_connections: i64,
    pub last_checked: DateTime<Utc>,
}

/// The `/status` JSON document.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub total_requests: u64,
    pub active_requests: i64,
    pub uptime_seconds: f64,
    pub start_time: DateTime<Utc>,
    pub backend_status: BTreeMap<String, BackendReport>,
}

/// Aggregates request counters and per-backend state for the `/status`
/// endpoint. Counter updates come from the dispatcher; backend rows are
/// refreshed periodically from pool snapshots.
#[derive(Debug)]
pub struct Reporter {
    started_at: DateTime<Utc>,
    start_instant: Instant,
    total_requests: AtomicU64,
    active_requests: AtomicI64,
    backends: RwLock<BTreeMap<String, BackendReport>>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            start_instant: Instant::now(),
            total_requests: AtomicU64::new(0),
            active_requests: AtomicI64::new(0),
            backends: RwLock::new(BTreeMap::new()),
        }
    }

    /// Seed rows for backends that have not been probed yet.
    pub fn register_backends(&self, backends: &[Arc<Backend>]) {
        let mut rows = self
            .backends
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for backend in backends {
            rows.entry(backend.addr().to_string())
                .or_insert_with(|| BackendReport {
                    url: backend.url().to_string(),
                    status: "unknown".to_string(),
                    active_connections: 0,
                    last_checked: self.started_at,
                });
        }
    }

    /// Refresh rows from a pool snapshot.
    pub fn update_backends(&self, backends: &[Arc<Backend>]) {
        let mut rows = self
            .backends
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for backend in backends {
            let status = match backend.status() {
                BackendStatus::Active => "healthy",
                BackendStatus::Retrying | BackendStatus::Evicted => "failed",
            };
            rows.insert(
                backend.addr().to_string(),
                BackendReport {
                    url: backend.url().to_string(),
                    status: status.to_string(),
                    active_connections: backend.connections(),
                    last_checked: Utc::now(),
                },
            );
        }
    }

    pub fn request_started(&self) {
        self.total_requests.fetch_add(1, Ordering::AcqRel);
        self.active_requests.fetch_add(1, Ordering::AcqRel);
    }

    pub fn request_finished(&self) {
        self.active_requests.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn generate(&self) -> StatusReport {
        let rows = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        StatusReport {
            timestamp: Utc::now(),
            total_requests: self.total_requests.load(Ordering::Acquire),
            active_requests: self.active_requests.load(Ordering::Acquire).max(0),
            uptime_seconds: self.start_instant.elapsed().as_secs_f64(),
            start_time: self.started_at,
            backend_status: rows.clone(),
        }
    }

    /// Serialize the report, compact by default.
    pub fn render(&self, pretty: bool) -> String {
        let report = self.generate();
        let rendered = if pretty {
            serde_json::to_string_pretty(&report)
        } else {
            serde_json::to_string(&report)
        };
        rendered.unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> Arc<Backend> {
        Arc::new(Backend::new(url, 1, None).unwrap())
    }

    #[test]
    fn test_request_counters() {
        let reporter = Reporter::new();
        reporter.request_started();
        reporter.request_started();
        reporter.request_finished();

        let report = reporter.generate();
        assert_eq!(report.total_requests, 2);
        assert_eq!(report.active_requests, 1);
    }

    #[test]
    fn test_active_requests_clamped_at_zero() {
        let reporter = Reporter::new();
        reporter.request_finished();
        assert_eq!(reporter.generate().active_requests, 0);
    }

    #[test]
    fn test_register_then_update() {
        let reporter = Reporter::new();
        let a = backend("http://127.0.0.1:9001");

        reporter.register_backends(&[Arc::clone(&a)]);
        let report = reporter.generate();
        assert_eq!(report.backend_status["127.0.0.1:9001"].status, "unknown");

        a.incr_conn();
        reporter.update_backends(&[Arc::clone(&a)]);
        let report = reporter.generate();
        let row = &report.backend_status["127.0.0.1:9001"];
        assert_eq!(row.status, "healthy");
        assert_eq!(row.active_connections, 1);

        a.set_status(BackendStatus::Retrying);
        reporter.update_backends(&[a]);
        let report = reporter.generate();
        assert_eq!(report.backend_status["127.0.0.1:9001"].status, "failed");
    }

    #[test]
    fn test_render_json_shape() {
        let reporter = Reporter::new();
        reporter.register_backends(&[backend("http://127.0.0.1:9001")]);
        reporter.request_started();

        let compact = reporter.render(false);
        assert!(!compact.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&compact).unwrap();
        assert!(parsed.get("timestamp").is_some());
        assert_eq!(parsed["total_requests"], 1);
        assert_eq!(parsed["active_requests"], 1);
        assert!(parsed.get("uptime_seconds").is_some());
        assert!(parsed["backend_status"]["127.0.0.1:9001"]["url"]
            .as_str()
            .unwrap()
            .contains("127.0.0.1:9001"));

        let pretty = reporter.render(true);
        assert!(pretty.contains('\n'));
        let reparsed: serde_json::Value = serde_json::from_str(&pretty).unwrap();
        assert_eq!(parsed["total_requests"], reparsed["total_requests"]);
    }
}
