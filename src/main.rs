//! Least-loaded HTTP load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ axum server ──▶ Dispatcher ──▶ Pool.acquire()  (least loaded, +1)
//!                                    │
//!                                    ▼
//!                              HttpForwarder ──▶ Backend
//!                                    │
//!     Client ◀── response body ◀─────┘
//!                    │ (finished or dropped)
//!                    ▼
//!          Completion notifier ──▶ Pool.release()  (-1, reposition)
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;

use leastload_proxy::config::{read_config, validate_config, ProxyConfig};
use leastload_proxy::lifecycle::{wait_for_signal, Shutdown};
use leastload_proxy::observability::{logging, metrics};
use leastload_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "leastload-proxy")]
#[command(version)]
#[command(about = "HTTP load balancer that routes each request to the least loaded backend")]
#[command(long_about = "
Routes every incoming HTTP request to the backend currently handling the
fewest in-flight requests.

Example usage:
  leastload-proxy http://127.0.0.1:3000 http://127.0.0.1:3001
  leastload-proxy --config balancer.toml --bind 0.0.0.0:80
")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listen address
    #[arg(short, long)]
    bind: Option<String>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Backend addresses; replace the configured list when given
    #[arg(value_name = "BACKEND")]
    backends: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if !cli.backends.is_empty() {
        config.backends = cli.backends;
    }

    logging::init(&config.observability.log_level);

    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            tracing::error!(%error, "Invalid configuration");
        }
        return Err(format!("configuration has {} error(s)", errors.len()).into());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        max_in_flight = ?config.dispatch.max_in_flight,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(&config)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
