//! Standalone health-check gRPC server.
//!
//! ```bash
//! marquee-health --port 50051
//! ```

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use marquee::config::HealthConfig;
use marquee::health::{run_health_server, HealthService};
use marquee::observability::tracing::init_tracing;
use marquee::server::spawn_signal_handler;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HealthConfig::parse();
    init_tracing("marquee-health", &config.log_level);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid listen address")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    run_health_server(addr, HealthService::new(config.location), shutdown_rx).await
}
