use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::backend::{Backend, BackendStatus};

/// Result of probing one backend during a health-check tick.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub backend: Arc<Backend>,
    pub healthy: bool,
}

#[derive(Debug, Default)]
struct Cohorts {
    active: Vec<Arc<Backend>>,
    retrying: Vec<Arc<Backend>>,
}

/// Two-cohort backend membership. Dispatchable backends live in `active`,
/// backends under probation in `retrying`; evicted backends are dropped from
/// both. Schedulers and the health checker work on snapshots so the lock is
/// never held across I/O.
#[derive(Debug, Default)]
pub struct Pool {
    cohorts: RwLock<Cohorts>,
}

impl Pool {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        let pool = Self::default();
        for backend in backends {
            pool.add(backend);
        }
        pool
    }

    /// Insert a backend into the cohort matching its current status.
    pub fn add(&self, backend: Arc<Backend>) {
        let mut cohorts = self
            .cohorts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if backend.is_alive() {
            cohorts.active.push(backend);
        } else {
            cohorts.retrying.push(backend);
        }
    }

    /// Snapshot of the dispatchable cohort.
    pub fn snapshot_active(&self) -> Vec<Arc<Backend>> {
        self.cohorts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .clone()
    }

    /// Snapshot of every member, active cohort first.
    pub fn snapshot_all(&self) -> Vec<Arc<Backend>> {
        let cohorts = self.cohorts.read().unwrap_or_else(PoisonError::into_inner);
        let mut all = Vec::with_capacity(cohorts.active.len() + cohorts.retrying.len());
        all.extend(cohorts.active.iter().cloned());
        all.extend(cohorts.retrying.iter().cloned());
        all
    }

    /// (active, retrying) cohort sizes.
    pub fn counts(&self) -> (usize, usize) {
        let cohorts = self.cohorts.read().unwrap_or_else(PoisonError::into_inner);
        (cohorts.active.len(), cohorts.retrying.len())
    }

    /// Apply one tick's probe results, relocating backends between cohorts
    /// in a single critical section.
    ///
    /// Active + success: stays, failure count cleared. Active + failure:
    /// demoted to retrying. Retrying + success: promoted to active.
    /// Retrying + failure: stays until `max_failures` probes have failed
    /// without an intervening success, then the backend is evicted for the
    /// rest of the process lifetime.
    pub fn apply_probe_results(&self, results: &[ProbeOutcome], max_failures: u32) {
        let mut cohorts = self
            .cohorts
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for outcome in results {
            let backend = &outcome.backend;

            if let Some(idx) = position_of(&cohorts.active, backend) {
                if outcome.healthy {
                    backend.set_status(BackendStatus::Active);
                } else {
                    let demoted = cohorts.active.remove(idx);
                    demoted.set_status(BackendStatus::Retrying);
                    let failures = demoted.record_failure();
                    warn!(
                        backend = %demoted.addr(),
                        failures,
                        "backend failed probe, moved to retry cohort"
                    );
                    cohorts.retrying.push(demoted);
                }
            } else if let Some(idx) = position_of(&cohorts.retrying, backend) {
                if outcome.healthy {
                    let promoted = cohorts.retrying.remove(idx);
                    promoted.set_status(BackendStatus::Active);
                    info!(backend = %promoted.addr(), "backend recovered, moved to active cohort");
                    cohorts.active.push(promoted);
                } else {
                    let failures = backend.record_failure();
                    if failures >= max_failures {
                        let evicted = cohorts.retrying.remove(idx);
                        evicted.set_status(BackendStatus::Evicted);
                        warn!(
                            backend = %evicted.addr(),
                            failures,
                            "backend evicted after repeated probe failures"
                        );
                    } else {
                        debug!(
                            backend = %backend.addr(),
                            failures,
                            max_failures,
                            "backend still failing probes"
                        );
                    }
                }
            }
            // Not in either cohort: evicted by an earlier tick, nothing to do.
        }
    }
}

fn position_of(cohort: &[Arc<Backend>], backend: &Arc<Backend>) -> Option<usize> {
    cohort.iter().position(|b| Arc::ptr_eq(b, backend))
}
