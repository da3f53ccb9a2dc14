use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::backend::Backend;
use super::pool::{Pool, ProbeOutcome};
use crate::config::HealthCheckConfig;
use crate::proxy::http_client;
use crate::shutdown::ShutdownSignal;
use crate::telemetry::metrics;

/// Hard cap on one backend's probe attempts within a tick, retries included.
const PROBE_DEADLINE: Duration = Duration::from_secs(3);

/// Supervisor deadline for a whole tick; an overrunning tick is abandoned.
const TICK_DEADLINE: Duration = Duration::from_secs(5);

/// Periodically probes every pool member and drives cohort transitions.
///
/// Each tick fans out one task per backend and rendezvouses on the results
/// before mutating the pool. A tick that is still running when the next one
/// fires makes the new tick a no-op ("skipped"), so a slow backend can delay
/// membership updates but never queue up probe work.
pub struct HealthChecker {
    pool: Arc<Pool>,
    interval: Duration,
    timeout: Duration,
    retry_count: u32,
    retry_interval: Duration,
    max_failures: u32,
    in_progress: AtomicBool,
    shutdown: ShutdownSignal,
}

impl HealthChecker {
    pub fn new(pool: Arc<Pool>, config: &HealthCheckConfig, shutdown: ShutdownSignal) -> Self {
        Self {
            pool,
            interval: config.interval,
            timeout: config.timeout,
            retry_count: config.retry_count.max(1),
            retry_interval: config.retry_interval,
            max_failures: config.max_failures,
            in_progress: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Tick loop; returns when the shutdown signal fires.
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "health checker started");
        loop {
            tokio::select! {
                _ = ticker.tick() => self.start_tick(),
                _ = shutdown.wait() => {
                    info!("health checker stopping");
                    return;
                }
            }
        }
    }

    /// Kick off one tick unless the previous one is still running. The tick
    /// itself runs under a supervisor task so the loop keeps ticking.
    fn start_tick(self: &Arc<Self>) {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("previous health check still running, skipping this tick");
            return;
        }

        let checker = Arc::clone(self);
        tokio::spawn(async move {
            let worker = Arc::clone(&checker);
            let mut tick = tokio::spawn(async move { worker.run_tick().await });

            match timeout(TICK_DEADLINE, &mut tick).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("health check tick failed: {}", e);
                    checker.in_progress.store(false, Ordering::Release);
                }
                Err(_) => {
                    tick.abort();
                    checker.in_progress.store(false, Ordering::Release);
                    warn!(deadline = ?TICK_DEADLINE, "health check tick overran its deadline, abandoned");
                }
            }
        });
    }

    /// Probe every member concurrently, then apply the transitions.
    async fn run_tick(self: Arc<Self>) {
        let backends = self.pool.snapshot_all();
        let mut probes: JoinSet<ProbeOutcome> = JoinSet::new();

        for backend in backends {
            let checker = Arc::clone(&self);
            probes.spawn(async move {
                let healthy = match timeout(PROBE_DEADLINE, checker.attempt_once(&backend)).await {
                    Ok(healthy) => healthy,
                    Err(_) => {
                        warn!(backend = %backend.addr(), "health probe exceeded deadline");
                        false
                    }
                };
                ProbeOutcome { backend, healthy }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(e) => error!("health probe task failed: {}", e),
            }
        }

        for outcome in &results {
            if !outcome.healthy {
                metrics::record_error(outcome.backend.addr(), "probe_failure");
            }
        }

        self.pool.apply_probe_results(&results, self.max_failures);
        let (active, retrying) = self.pool.counts();
        debug!(active, retrying, "health check tick complete");
        self.in_progress.store(false, Ordering::Release);
    }

    /// One backend's check within a tick: up to `retry_count` probe attempts
    /// with `retry_interval` pauses, each attempt bounded by `timeout`. The
    /// pause is interruptible by shutdown.
    pub(crate) async fn attempt_once(&self, backend: &Backend) -> bool {
        for attempt in 1..=self.retry_count {
            let probed = match timeout(self.timeout, self.probe(backend)).await {
                Ok(healthy) => healthy,
                Err(_) => {
                    debug!(
                        backend = %backend.addr(),
                        attempt,
                        retry_count = self.retry_count,
                        "probe attempt timed out"
                    );
                    false
                }
            };

            if probed {
                return true;
            }

            if attempt < self.retry_count {
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_interval) => {}
                    _ = shutdown.wait() => return false,
                }
            }
        }
        false
    }

    async fn probe(&self, backend: &Backend) -> bool {
        match backend.health_path() {
            Some(path) => self.probe_http(backend, path).await,
            None => self.probe_tcp(backend.addr()).await,
        }
    }

    /// HTTP probe: GET `{url}{path}`, healthy iff 200.
    async fn probe_http(&self, backend: &Backend, path: &str) -> bool {
        let url = format!("{}://{}{}", backend.scheme(), backend.addr(), path);
        match http_client::get_status(&url, self.timeout).await {
            Ok(status) => status == hyper::StatusCode::OK,
            Err(e) => {
                debug!(backend = %backend.addr(), error = %e, "http probe failed");
                false
            }
        }
    }

    /// TCP probe: healthy iff the connection is established.
    async fn probe_tcp(&self, addr: &str) -> bool {
        match TcpStream::connect(addr).await {
            Ok(_) => true,
            Err(e) => {
                debug!(backend = %addr, error = %e, "tcp probe failed");
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_in_progress(&self, value: bool) {
        self.in_progress.store(value, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}
