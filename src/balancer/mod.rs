//! Backend pool management and health checking.
//!
//! Backends live in one of two cohorts: the **active** cohort is eligible for
//! request dispatch, the **retrying** cohort is still probed but never
//! dispatched to. The health checker demotes a backend on its first failed
//! probe, promotes it back on a successful one, and evicts it for good after
//! `max_failures` consecutive failed probes.

pub mod backend;
pub mod health;
pub mod pool;

pub use backend::{Backend, BackendStatus};
pub use health::HealthChecker;
pub use pool::{Pool, ProbeOutcome};
