use hyper::Request;
use std::net::SocketAddr;
use std::sync::Arc;

use super::{alive, Scheduler};
use crate::balancer::Backend;

/// Route a client IP to a fixed backend via FNV-1a, best-effort sticky for
/// as long as the live cohort is stable.
#[derive(Debug, Default)]
pub struct IpHash;

impl Scheduler for IpHash {
    fn name(&self) -> &'static str {
        "ip_hash"
    }

    fn next(&self, active: &[Arc<Backend>], client_ip: &str) -> Option<Arc<Backend>> {
        let candidates = alive(active);
        if candidates.is_empty() {
            return None;
        }

        let index = fnv1a_32(client_ip.as_bytes()) as usize % candidates.len();
        Some(Arc::clone(candidates[index]))
    }
}

/// 32-bit FNV-1a over the input bytes.
pub(crate) fn fnv1a_32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    data.iter()
        .fold(OFFSET_BASIS, |hash, byte| {
            (hash ^ u32::from(*byte)).wrapping_mul(PRIME)
        })
}

/// Extract the client IP for hashing, in priority order: first
/// `X-Forwarded-For` hop, then `X-Real-IP`, then the peer socket address
/// with the port stripped, falling back to loopback.
pub fn client_ip<B>(req: &Request<B>) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
    {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    if let Some(remote) = req.extensions().get::<SocketAddr>() {
        return remote.ip().to_string();
    }

    "127.0.0.1".to_string()
}
