use hyper::Uri;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use crate::error::SpindleError;

/// Membership state of a backend. The cohort lists in the pool are
/// authoritative; this field is a cached hint for lock-free readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Active,
    Retrying,
    Evicted,
}

impl BackendStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BackendStatus::Active,
            1 => BackendStatus::Retrying,
            _ => BackendStatus::Evicted,
        }
    }
}

/// One upstream server. Shared between the pool, the schedulers, the health
/// checker and the dispatcher as `Arc<Backend>`; all mutable state lives in
/// atomics so handles can be read without locking.
#[derive(Debug)]
pub struct Backend {
    url: Uri,
    addr: String,
    weight: u32,
    health_path: Option<String>,
    status: AtomicU8,
    failure_count: AtomicU32,
    connections: AtomicI64,
}

impl Backend {
    /// Build a backend from an absolute URL. Backends start out Active.
    pub fn new(url: &str, weight: u32, health_path: Option<String>) -> Result<Self, SpindleError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| SpindleError::config(format!("invalid backend url {}: {}", url, e)))?;

        let (scheme, authority) = match (uri.scheme_str(), uri.authority()) {
            (Some(scheme), Some(authority)) => (scheme, authority),
            _ => {
                return Err(SpindleError::config(format!(
                    "backend url must be absolute (scheme and host): {}",
                    url
                )))
            }
        };

        let port = uri
            .port_u16()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });
        let addr = format!("{}:{}", authority.host(), port);

        Ok(Self {
            url: uri,
            addr,
            weight: weight.max(1),
            health_path,
            status: AtomicU8::new(BackendStatus::Active as u8),
            failure_count: AtomicU32::new(0),
            connections: AtomicI64::new(0),
        })
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme_str().unwrap_or("http")
    }

    /// `host:port` of this backend, with the scheme default filled in.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn health_path(&self) -> Option<&str> {
        self.health_path.as_deref()
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_alive(&self) -> bool {
        self.status() == BackendStatus::Active
    }

    /// Update the cached status. Moving to Active also clears the failure
    /// counter.
    pub fn set_status(&self, status: BackendStatus) {
        self.status.store(status as u8, Ordering::Release);
        if status == BackendStatus::Active {
            self.failure_count.store(0, Ordering::Release);
        }
    }

    pub fn connections(&self) -> i64 {
        self.connections.load(Ordering::Acquire)
    }

    pub fn incr_conn(&self) {
        self.connections.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decr_conn(&self) {
        self.connections.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    /// Count one failed probe; returns the new total.
    pub fn record_failure(&self) -> u32 {
        self.failure_count.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_backend_defaults() {
        let backend = Backend::new("http://127.0.0.1:9001", 3, None).unwrap();
        assert_eq!(backend.addr(), "127.0.0.1:9001");
        assert_eq!(backend.scheme(), "http");
        assert_eq!(backend.weight(), 3);
        assert!(backend.is_alive());
        assert_eq!(backend.status(), BackendStatus::Active);
        assert_eq!(backend.failure_count(), 0);
        assert_eq!(backend.connections(), 0);
    }

    #[test]
    fn test_default_ports() {
        let http = Backend::new("http://example.com", 1, None).unwrap();
        assert_eq!(http.addr(), "example.com:80");

        let https = Backend::new("https://example.com", 1, None).unwrap();
        assert_eq!(https.addr(), "example.com:443");
    }

    #[test]
    fn test_rejects_relative_url() {
        assert!(Backend::new("/health", 1, None).is_err());
        assert!(Backend::new("not a url", 1, None).is_err());
    }

    #[test]
    fn test_zero_weight_clamped() {
        let backend = Backend::new("http://127.0.0.1:9001", 0, None).unwrap();
        assert_eq!(backend.weight(), 1);
    }

    #[test]
    fn test_set_status_active_resets_failures() {
        let backend = Backend::new("http://127.0.0.1:9001", 1, None).unwrap();
        backend.set_status(BackendStatus::Retrying);
        assert_eq!(backend.record_failure(), 1);
        assert_eq!(backend.record_failure(), 2);
        assert!(!backend.is_alive());

        backend.set_status(BackendStatus::Active);
        assert!(backend.is_alive());
        assert_eq!(backend.failure_count(), 0);
    }

    #[test]
    fn test_connection_counter_pairs() {
        let backend = Backend::new("http://127.0.0.1:9001", 1, None).unwrap();
        backend.incr_conn();
        backend.incr_conn();
        assert_eq!(backend.connections(), 2);
        backend.decr_conn();
        backend.decr_conn();
        assert_eq!(backend.connections(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_connections_never_negative_under_contention() {
        let backend = Arc::new(Backend::new("http://127.0.0.1:9001", 1, None).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let backend = Arc::clone(&backend);
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    backend.incr_conn();
                    backend.decr_conn();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(backend.connections(), 0);
    }
}
