//! Telemetry: Prometheus metrics and the JSON status report.

pub mod metrics;
pub mod status;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

use crate::balancer::Pool;
use crate::shutdown::ShutdownSignal;
use self::status::Reporter;

/// How often the per-backend gauges and status rows are refreshed.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Periodically pushes pool state into the gauges and the status reporter.
pub async fn run_refresher(pool: Arc<Pool>, reporter: Arc<Reporter>, mut shutdown: ShutdownSignal) {
    let mut ticker = interval_at(Instant::now() + REFRESH_INTERVAL, REFRESH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let backends = pool.snapshot_all();
                metrics::update_backend_status(&backends);
                reporter.update_backends(&backends);
            }
            _ = shutdown.wait() => {
                info!("telemetry refresher stopping");
                return;
            }
        }
    }
}
