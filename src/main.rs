//! API gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!  Client ──▶ http::server ──▶ filter chain ──▶ routing ──▶ route filters
//!                                                               │
//!                                                               ▼
//!  Client ◀── response ◀── client (pool, timeouts, retries) ◀── load_balancer
//!                 ▲                    │                        (gray release)
//!                 │                    ▼
//!                 └──── resilience (circuit breaker, fallback)
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use api_gateway::config::{load_config, GatewayConfig};
use api_gateway::lifecycle::{signals, startup, Shutdown};
use api_gateway::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "api-gateway", version, about = "HTTP API gateway")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,

    /// Log level, overriding the configured one.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    logging::init_logging(&level);

    if args.check {
        startup::build_gateway(&config)?;
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        "api-gateway starting"
    );

    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_handler(shutdown.clone());
    startup::run(config, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
