use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

use super::handler::ProxyHandler;
use crate::balancer::{Backend, HealthChecker, Pool};
use crate::config::Config;
use crate::error::SpindleError;
use crate::scheduler::{self, Algorithm};
use crate::shutdown::ShutdownSignal;
use crate::telemetry::status::Reporter;
use crate::telemetry::{self, metrics};

/// The assembled load balancer: pool, scheduler, dispatcher and telemetry,
/// ready to be bound to the listen address.
pub struct ProxyServer {
    config: Config,
    pool: Arc<Pool>,
    handler: ProxyHandler,
    reporter: Arc<Reporter>,
    prometheus: PrometheusHandle,
}

impl ProxyServer {
    /// Build every component from a validated configuration.
    pub fn new(config: Config) -> Result<Self, SpindleError> {
        let algorithm: Algorithm = config.algorithm.parse()?;

        let mut backends = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            backends.push(Arc::new(Backend::new(
                &server.url,
                server.weight,
                server.health_check_path.clone(),
            )?));
        }

        let pool = Arc::new(Pool::new(backends));
        let reporter = Arc::new(Reporter::new());
        reporter.register_backends(&pool.snapshot_all());
        let prometheus = metrics::install();

        let handler = ProxyHandler::new(
            Arc::clone(&pool),
            scheduler::create(algorithm),
            Arc::clone(&reporter),
        );

        info!(
            algorithm = algorithm.as_str(),
            backends = config.servers.len(),
            "proxy configured"
        );

        Ok(Self {
            config,
            pool,
            handler,
            reporter,
            prometheus,
        })
    }

    /// Bind the listener and start the background loops. The returned
    /// [`BoundServer`] reports the bound address (useful with port 0) and
    /// serves until the shutdown signal fires, then drains connections.
    pub fn bind(self, shutdown: ShutdownSignal) -> Result<BoundServer, SpindleError> {
        let addr = resolve_listen_addr(&self.config.listen_addr)?;

        let health = Arc::new(HealthChecker::new(
            Arc::clone(&self.pool),
            &self.config.health_check,
            shutdown.clone(),
        ));
        tokio::spawn(health.run());
        tokio::spawn(telemetry::run_refresher(
            Arc::clone(&self.pool),
            Arc::clone(&self.reporter),
            shutdown.clone(),
        ));

        let state = Arc::new(AppState {
            handler: self.handler,
            reporter: self.reporter,
            prometheus: self.prometheus,
        });

        let make_service = make_service_fn(move |conn: &AddrStream| {
            let state = Arc::clone(&state);
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |mut req| {
                    let state = Arc::clone(&state);
                    // Attach the peer address for client IP extraction.
                    req.extensions_mut().insert(remote);
                    async move { state.route(req).await }
                }))
            }
        });

        let server = Server::try_bind(&addr)?.serve(make_service);
        let local_addr = server.local_addr();

        let mut shutdown = shutdown;
        let graceful = server.with_graceful_shutdown(async move {
            shutdown.wait().await;
        });

        Ok(BoundServer {
            local_addr,
            future: Box::pin(async move { graceful.await.map_err(SpindleError::from) }),
        })
    }

    /// Bind and serve in one step.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), SpindleError> {
        self.bind(shutdown)?.serve().await
    }
}

/// A listener that has been bound but not yet driven.
pub struct BoundServer {
    local_addr: SocketAddr,
    future: Pin<Box<dyn Future<Output = Result<(), SpindleError>> + Send>>,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until shutdown, then drain in-flight connections.
    pub async fn serve(self) -> Result<(), SpindleError> {
        info!("listening on {}", self.local_addr);
        self.future.await
    }
}

struct AppState {
    handler: ProxyHandler,
    reporter: Arc<Reporter>,
    prometheus: PrometheusHandle,
}

impl AppState {
    /// Built-in endpoints are served from the proxy listener itself;
    /// everything else is reverse-proxied.
    async fn route(self: Arc<Self>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        match req.uri().path() {
            "/metrics" => Ok(text_response(
                self.prometheus.render(),
                "text/plain; version=0.0.4",
            )),
            "/status" => {
                let pretty = req
                    .uri()
                    .query()
                    .map(|q| q.split('&').any(|pair| pair == "pretty=true"))
                    .unwrap_or(false);
                Ok(text_response(self.reporter.render(pretty), "application/json"))
            }
            "/health" => Ok(text_response("OK".to_string(), "text/plain")),
            _ => self.handler.handle_request(req).await,
        }
    }
}

fn text_response(body: String, content_type: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Resolve the configured listen address; a bare `":port"` binds all
/// interfaces, matching the original config format.
fn resolve_listen_addr(raw: &str) -> Result<SocketAddr, SpindleError> {
    let raw = raw.trim();
    let candidate = if raw.starts_with(':') {
        format!("0.0.0.0{}", raw)
    } else {
        raw.to_string()
    };
    candidate
        .parse()
        .map_err(|e| SpindleError::config(format!("invalid listen_addr {}: {}", raw, e)))
}
