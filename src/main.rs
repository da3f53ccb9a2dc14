use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use spindle::config::Config;
use spindle::proxy::ProxyServer;
use spindle::shutdown::Shutdown;

/// How long in-flight connections get to finish after a shutdown signal.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "spindle")]
#[command(about = "An HTTP reverse-proxy load balancer with active health checking")]
struct Args {
    #[arg(short, long, default_value = "config/config.yaml")]
    config: String,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("spindle={}", level))
        .init();

    let config = Config::from_file(&args.config).await?;
    info!("loaded configuration from {}", args.config);

    let (shutdown, signal) = Shutdown::new();
    let server = ProxyServer::new(config)?.bind(signal)?;
    info!("proxy listening on {}", server.local_addr());

    let mut serving = tokio::spawn(server.serve());

    tokio::select! {
        result = &mut serving => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("server error: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("server task failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = shutdown_signal() => {
            warn!("shutdown signal received, draining connections");
            shutdown.trigger();
            match tokio::time::timeout(DRAIN_DEADLINE, &mut serving).await {
                Ok(Ok(Ok(()))) => info!("connection drain complete"),
                Ok(Ok(Err(e))) => error!("server error during drain: {}", e),
                Ok(Err(e)) => error!("server task failed during drain: {}", e),
                Err(_) => {
                    warn!("drain deadline {:?} exceeded, aborting", DRAIN_DEADLINE);
                    serving.abort();
                }
            }
        }
    }

    info!("spindle shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
