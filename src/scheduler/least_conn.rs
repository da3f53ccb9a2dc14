use std::sync::Arc;

use super::{alive, Scheduler};
use crate::balancer::Backend;

/// Pick the live backend with the fewest in-flight requests. Ties go to the
/// first backend in snapshot order.
#[derive(Debug, Default)]
pub struct LeastConn;

impl Scheduler for LeastConn {
    fn name(&self) -> &'static str {
        "least_conn"
    }

    fn next(&self, active: &[Arc<Backend>], _client_ip: &str) -> Option<Arc<Backend>> {
        alive(active)
            .into_iter()
            .min_by_key(|backend| backend.connections())
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::BackendStatus;

    fn backends(n: usize) -> Vec<Arc<Backend>> {
        (0..n)
            .map(|i| {
                Arc::new(Backend::new(&format!("http://127.0.0.1:{}", 9000 + i), 1, None).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_picks_minimum() {
        let pool = backends(3);
        pool[0].incr_conn();
        pool[0].incr_conn();
        pool[1].incr_conn();

        let lc = LeastConn;
        assert_eq!(lc.next(&pool, "").unwrap().addr(), "127.0.0.1:9002");
    }

    #[test]
    fn test_tie_goes_to_first() {
        let pool = backends(3);
        pool[0].incr_conn();

        let lc = LeastConn;
        // 9001 and 9002 both have zero connections; 9001 comes first.
        assert_eq!(lc.next(&pool, "").unwrap().addr(), "127.0.0.1:9001");
    }

    #[test]
    fn test_follows_connection_changes() {
        let pool = backends(2);
        let lc = LeastConn;

        let first = lc.next(&pool, "").unwrap();
        first.incr_conn();
        let second = lc.next(&pool, "").unwrap();
        assert_ne!(first.addr(), second.addr());

        first.decr_conn();
        second.incr_conn();
        assert_eq!(lc.next(&pool, "").unwrap().addr(), first.addr());
    }

    #[test]
    fn test_skips_dead_members() {
        let pool = backends(2);
        pool[1].incr_conn();
        pool[0].set_status(BackendStatus::Retrying);

        let lc = LeastConn;
        assert_eq!(lc.next(&pool, "").unwrap().addr(), "127.0.0.1:9001");
    }

    #[test]
    fn test_empty_cohort_returns_none() {
        let lc = LeastConn;
        assert!(lc.next(&[], "").is_none());
    }
}
