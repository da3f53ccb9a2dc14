pub mod balancer;
pub mod config;
pub mod error;
pub mod proxy;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use error::{SpindleError, SpindleResult};
pub use proxy::ProxyServer;
pub use shutdown::{Shutdown, ShutdownSignal};
