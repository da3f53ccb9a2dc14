use std::sync::{Arc, Mutex, PoisonError};

use super::{alive, Scheduler};
use crate::balancer::Backend;

/// Smooth weighted round-robin.
///
/// Every selection adds each live backend's weight to its current weight,
/// picks the largest (ties go to the lowest index), then subtracts the total
/// weight from the winner. Over any window of `total_weight` selections each
/// backend is picked exactly `weight` times, without the bursts a blocked
/// WRR would produce.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    current_weights: Mutex<Vec<i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for WeightedRoundRobin {
    fn name(&self) -> &'static str {
        "weighted_rr"
    }

    fn next(&self, active: &[Arc<Backend>], _client_ip: &str) -> Option<Arc<Backend>> {
        let candidates = alive(active);
        if candidates.is_empty() {
            return None;
        }

        let mut weights = self
            .current_weights
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Indices refer to the snapshot taken now; when the live cohort
        // changes size the accumulated state no longer lines up, so start
        // over from zero.
        if weights.len() != candidates.len() {
            *weights = vec![0; candidates.len()];
        }

        let mut total = 0i64;
        for (i, backend) in candidates.iter().enumerate() {
            let weight = i64::from(backend.weight());
            weights[i] += weight;
            total += weight;
        }

        let mut best = 0;
        for i in 1..candidates.len() {
            if weights[i] > weights[best] {
                best = i;
            }
        }
        weights[best] -= total;

        Some(Arc::clone(candidates[best]))
    }
}
