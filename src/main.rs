//! Marquee: transactional album catalog service.
//!
//! # Usage
//!
//! ```bash
//! marquee --project demo --instance local --database catalog --emulator-dir ./emulator
//! ```
//!
//! Environment variables can also be used:
//! - `GCLOUD_PROJECT`: Project identifier
//! - `MARQUEE_SPANNER_INSTANCE_ID`: Instance identifier
//! - `MARQUEE_SPANNER_DATABASE_ID`: Database identifier
//! - `SPANNER_EMULATOR_HOST`: Local emulator root; provisions the database on startup
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use marquee::config::Config;
use marquee::observability::metrics::init_metrics_with_endpoint;
use marquee::observability::tracing::init_tracing;
use marquee::server::{run_server, spawn_signal_handler};
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let emulator = config
        .emulator_dir
        .as_ref()
        .map_or_else(|| "no".to_string(), |dir| format!("yes ({})", dir.display()));
    eprintln!(
        r#"
  Marquee v{} - Album Catalog

  Configuration:
    Project:      {}
    Instance:     {}
    Database:     {}
    Use Emulator: {}
    Address:      {}:{}
    Log Level:    {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.project,
        config.instance,
        config.database,
        emulator,
        config.host,
        config.http_port,
        config.log_level
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing required parameters exit here with a usage error
    let config = Config::parse_args();

    init_tracing("marquee", &config.log_level);
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    print_banner(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    run_server(config, shutdown_rx).await?;

    tracing::info!("Marquee shutdown complete");
    Ok(())
}
