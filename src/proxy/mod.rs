//! Request dispatch and the HTTP listener.

pub mod handler;
pub mod http_client;
pub mod server;

pub use handler::{ProxyHandler, RequestContext};
pub use server::{BoundServer, ProxyServer};
