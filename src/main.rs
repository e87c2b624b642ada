//! Bandwidth-saving image proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                   IMAGE PROXY                        │
//!                        │                                                      │
//!   GET /?url=…&l=…      │  ┌─────────┐   ┌────────────┐   ┌────────────────┐   │
//!   ─────────────────────┼─▶│  http   │──▶│ loop guard │──▶│ origin fetcher │◀──┼──── Origin
//!                        │  │ server  │   └─────┬──────┘   └───────┬────────┘   │     Server
//!                        │  └─────────┘         │ loop             │            │
//!                        │                      ▼                  ▼            │
//!                        │               ┌────────────┐     ┌────────────┐      │
//!   302 location: url    │               │  redirect  │◀────│  decider   │      │
//!   ◀────────────────────┼───────────────│  fallback  │     └──┬──────┬──┘      │
//!                        │               └────────────┘ fail   │      │         │
//!                        │                      ▲      ┌───────▼──┐ ┌─▼──────┐  │
//!   200 image/webp|jpeg  │                      └──────│transcoder│ │ bypass │  │
//!   ◀────────────────────┼─────────────────────────────└──────────┘ │ stream │  │
//!   200 passthrough      │                                          └────────┘  │
//!   ◀────────────────────┼──────────────────────────────────────────────┘       │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use bandwidth_hero_proxy::config::{apply_env_overrides, load_config, validate_config, ProxyConfig};
use bandwidth_hero_proxy::lifecycle::{signals, Shutdown};
use bandwidth_hero_proxy::observability::{logging, metrics};
use bandwidth_hero_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "bandwidth-hero-proxy")]
#[command(about = "Image compression proxy for low-bandwidth clients", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    validate_config(&config).map_err(|errors| {
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    })?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "bandwidth-hero-proxy starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        animate = config.compression.animate,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
