use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{alive, Scheduler};
use crate::balancer::Backend;

/// Plain round-robin over the live members of the snapshot.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn next(&self, active: &[Arc<Backend>], _client_ip: &str) -> Option<Arc<Backend>> {
        let candidates = alive(active);
        if candidates.is_empty() {
            return None;
        }

        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        let index = (turn % candidates.len() as u64) as usize;
        Some(Arc::clone(candidates[index]))
    }
}
