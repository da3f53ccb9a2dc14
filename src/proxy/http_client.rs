use hyper::client::HttpConnector;
use hyper::header::HeaderMap;
use hyper::{Body, Client, Method, Request, Response, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use once_cell::sync::Lazy;
use std::time::Duration;

use crate::error::SpindleError;

/// Upstream dial deadline.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Deadline for the upstream response headers; also bounds the TLS
/// handshake, which happens inside the same request future.
pub const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(5);
/// Idle keep-alive for pooled upstream connections.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Idle connections retained per upstream host.
pub const POOL_MAX_IDLE_PER_HOST: usize = 20;

/// Shared hyper client with connection pooling (HTTP/HTTPS via rustls).
///
/// A single client instance is reused across requests and health probes so
/// upstream connections actually pool.
static SHARED_CLIENT: Lazy<Client<HttpsConnector<HttpConnector>, Body>> = Lazy::new(build_client);

fn build_client() -> Client<HttpsConnector<HttpConnector>, Body> {
    let mut http = HttpConnector::new();
    http.enforce_http(false); // the rustls wrapper handles https
    http.set_nodelay(true);
    http.set_connect_timeout(Some(CONNECT_TIMEOUT));
    http.set_keepalive(Some(POOL_IDLE_TIMEOUT));

    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    Client::builder()
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build::<_, Body>(https)
}

/// Forward a prepared request upstream. The future resolves once response
/// headers arrive; the body keeps streaming afterwards.
pub async fn forward(req: Request<Body>) -> Result<Response<Body>, SpindleError> {
    let response = tokio::time::timeout(RESPONSE_HEADER_TIMEOUT, SHARED_CLIENT.request(req))
        .await
        .map_err(|_| SpindleError::timeout("upstream response headers", RESPONSE_HEADER_TIMEOUT))?
        .map_err(SpindleError::from)?;
    Ok(response)
}

/// Lightweight GET returning only the status code, used by health probes.
pub async fn get_status(url: &str, deadline: Duration) -> Result<StatusCode, SpindleError> {
    let uri: Uri = url.parse()?;
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())?;

    let response = tokio::time::timeout(deadline, SHARED_CLIENT.request(req))
        .await
        .map_err(|_| SpindleError::timeout("health probe", deadline))?
        .map_err(SpindleError::from)?;
    Ok(response.status())
}

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Remove hop-by-hop headers, including any named by the Connection header.
pub(crate) fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let connection_named: Vec<String> = headers
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|name| name.trim().to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    for name in connection_named {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn test_hop_by_hop_detection() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("transfer-encoding"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("x-forwarded-for"));
    }

    #[test]
    fn test_strip_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-custom"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-custom", HeaderValue::from_static("1"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        strip_hop_by_hop_headers(&mut headers);

        assert!(headers.get("connection").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-custom").is_none());
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn test_get_status_connection_refused() {
        // Port 9 on loopback: nothing listens there.
        let result = get_status("http://127.0.0.1:9/health", Duration::from_millis(500)).await;
        assert!(matches!(
            result,
            Err(SpindleError::BackendTransport { .. }) | Err(SpindleError::BackendTimeout { .. })
        ));
    }
}
