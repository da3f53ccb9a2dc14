//! Scheduling algorithms.
//!
//! - **round_robin**: cycle through the active cohort with an atomic cursor
//! - **weighted_rr**: smooth weighted round-robin, interleaving selections
//!   according to weights
//! - **least_conn**: pick the backend with the fewest in-flight requests
//! - **ip_hash**: pin a client IP to a backend for as long as the active
//!   cohort is stable

pub mod ip_hash;
pub mod least_conn;
pub mod round_robin;
pub mod weighted_rr;

use std::str::FromStr;
use std::sync::Arc;

use crate::balancer::Backend;
use crate::error::SpindleError;

pub use ip_hash::IpHash;
pub use least_conn::LeastConn;
pub use round_robin::RoundRobin;
pub use weighted_rr::WeightedRoundRobin;

/// A scheduling policy. Implementations re-check `is_alive()` on the
/// snapshot they receive (membership can change between snapshot and
/// selection) and return `None` when nothing dispatchable remains.
///
/// `client_ip` is the already-extracted client address; only ip_hash
/// consumes it.
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &'static str;

    fn next(&self, active: &[Arc<Backend>], client_ip: &str) -> Option<Arc<Backend>>;
}

/// The closed set of supported algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RoundRobin,
    LeastConn,
    WeightedRr,
    IpHash,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::LeastConn => "least_conn",
            Algorithm::WeightedRr => "weighted_rr",
            Algorithm::IpHash => "ip_hash",
        }
    }
}

impl FromStr for Algorithm {
    type Err = SpindleError;

    /// Case-insensitive algorithm lookup.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Algorithm::RoundRobin),
            "least_conn" => Ok(Algorithm::LeastConn),
            "weighted_rr" => Ok(Algorithm::WeightedRr),
            "ip_hash" => Ok(Algorithm::IpHash),
            other => Err(SpindleError::config(format!(
                "unsupported load balancing algorithm: {}",
                other
            ))),
        }
    }
}

/// Build the scheduler for an algorithm.
pub fn create(algorithm: Algorithm) -> Arc<dyn Scheduler> {
    match algorithm {
        Algorithm::RoundRobin => Arc::new(RoundRobin::new()),
        Algorithm::LeastConn => Arc::new(LeastConn),
        Algorithm::WeightedRr => Arc::new(WeightedRoundRobin::new()),
        Algorithm::IpHash => Arc::new(IpHash),
    }
}

/// Dispatchable members of a cohort snapshot.
fn alive(active: &[Arc<Backend>]) -> Vec<&Arc<Backend>> {
    active.iter().filter(|b| b.is_alive()).collect()
}
