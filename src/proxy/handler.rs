use chrono::Utc;
use hyper::body::HttpBody as _;
use hyper::header::{HeaderValue, HOST};
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::http_client;
use crate::balancer::{Backend, Pool};
use crate::error::SpindleError;
use crate::scheduler::{ip_hash, Scheduler};
use crate::telemetry::metrics;
use crate::telemetry::status::Reporter;

/// Per-request identifiers, carried in the request extensions.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    /// Monotonic nanosecond timestamp doubling as the request id.
    pub id: i64,
    pub accepted_at: Instant,
}

impl RequestContext {
    fn new() -> Self {
        Self {
            id: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            accepted_at: Instant::now(),
        }
    }
}

/// The reverse-proxy dispatcher: pick a peer, forward, stream the response
/// back, keep the connection gauge and telemetry consistent.
#[derive(Clone)]
pub struct ProxyHandler {
    pool: Arc<Pool>,
    scheduler: Arc<dyn Scheduler>,
    reporter: Arc<Reporter>,
}

impl ProxyHandler {
    pub fn new(pool: Arc<Pool>, scheduler: Arc<dyn Scheduler>, reporter: Arc<Reporter>) -> Self {
        Self {
            pool,
            scheduler,
            reporter,
        }
    }

    pub async fn handle_request(&self, mut req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let ctx = RequestContext::new();
        req.extensions_mut().insert(ctx);

        let client_ip = ip_hash::client_ip(&req);
        let remote_ip = req
            .extensions()
            .get::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| client_ip.clone());

        let active = self.pool.snapshot_active();
        let peer = match self.scheduler.next(&active, &client_ip) {
            Some(peer) if peer.is_alive() => peer,
            _ => {
                warn!(request_id = ctx.id, "no available backend");
                metrics::record_error("", SpindleError::NoAvailableBackend.error_type());
                return Ok(error_response(StatusCode::SERVICE_UNAVAILABLE));
            }
        };

        debug!(
            request_id = ctx.id,
            backend = %peer.addr(),
            algorithm = self.scheduler.name(),
            "dispatching request"
        );

        let method = req.method().clone();
        let upstream_req = match build_upstream_request(req, &peer, &remote_ip) {
            Ok(upstream_req) => upstream_req,
            Err(e) => {
                warn!(request_id = ctx.id, error = %e, "failed to build upstream request");
                return Ok(error_response(StatusCode::INTERNAL_SERVER_ERROR));
            }
        };

        peer.incr_conn();
        self.reporter.request_started();
        let mut guard = RequestGuard::new(
            Arc::clone(&peer),
            Arc::clone(&self.reporter),
            method,
            ctx.accepted_at,
        );

        match http_client::forward(upstream_req).await {
            Ok(upstream) => Ok(stream_response(upstream, guard)),
            Err(e) => {
                let status = e.status_code();
                guard.set_status(status);
                metrics::record_error(peer.addr(), e.error_type());
                warn!(
                    request_id = ctx.id,
                    backend = %peer.addr(),
                    error = %e,
                    "upstream request failed"
                );
                drop(guard);
                Ok(error_response(status))
            }
        }
    }
}

/// Pairs `incr_conn` with exactly one `decr_conn`, and records the request
/// sample, no matter how the request ends: streamed to completion, failed in
/// transport, or abandoned by the client mid-response.
struct RequestGuard {
    backend: Arc<Backend>,
    reporter: Arc<Reporter>,
    method: Method,
    accepted_at: Instant,
    status: Option<StatusCode>,
}

impl RequestGuard {
    fn new(
        backend: Arc<Backend>,
        reporter: Arc<Reporter>,
        method: Method,
        accepted_at: Instant,
    ) -> Self {
        Self {
            backend,
            reporter,
            method,
            accepted_at,
            status: None,
        }
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.backend.decr_conn();
        self.reporter.request_finished();
        if let Some(status) = self.status {
            metrics::record_request(
                self.backend.addr(),
                status,
                &self.method,
                self.accepted_at.elapsed(),
            );
        }
    }
}

/// Rewrite the client request for the chosen peer: swap in the peer's
/// scheme and authority, drop hop-by-hop headers, retarget `Host`, and
/// append the caller to `X-Forwarded-For` preserving prior hops.
fn build_upstream_request(
    req: Request<Body>,
    peer: &Backend,
    remote_ip: &str,
) -> Result<Request<Body>, SpindleError> {
    let (mut parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = format!("{}://{}{}", peer.scheme(), peer.addr(), path_and_query).parse()?;
    parts.uri = uri;

    http_client::strip_hop_by_hop_headers(&mut parts.headers);

    parts.headers.insert(
        HOST,
        HeaderValue::from_str(peer.addr())
            .map_err(|e| SpindleError::transport(format!("invalid host header: {}", e)))?,
    );
    append_forwarded_for(&mut parts.headers, remote_ip);

    Ok(Request::from_parts(parts, body))
}

fn append_forwarded_for(headers: &mut hyper::HeaderMap, remote_ip: &str) {
    let value = match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
    {
        Some(existing) => format!("{}, {}", existing, remote_ip),
        None => remote_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

/// Relay the upstream response downstream, pumping the body through a
/// channel. The guard travels with the pump task so the connection gauge
/// drops exactly when the transfer ends, client disconnects included.
fn stream_response(upstream: Response<Body>, mut guard: RequestGuard) -> Response<Body> {
    let (parts, mut upstream_body) = upstream.into_parts();
    guard.set_status(parts.status);

    let mut builder = Response::builder().status(parts.status);
    for (name, value) in parts.headers.iter() {
        if !http_client::is_hop_by_hop_header(name.as_str()) {
            builder = builder.header(name, value);
        }
    }

    let (mut tx, body) = Body::channel();
    tokio::spawn(async move {
        let _guard = guard;
        while let Some(chunk) = upstream_body.data().await {
            match chunk {
                Ok(chunk) => {
                    // A send error means the client went away; stop pulling.
                    if tx.send_data(chunk).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "upstream body error");
                    tx.abort();
                    break;
                }
            }
        }
    });

    builder
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn error_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(status.canonical_reason().unwrap_or("error")))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
