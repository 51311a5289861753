//! Startup sequence and serving lifecycle.
//!
//! On startup, in order:
//! - Provision the instance and database when running against an emulator
//! - Write the fixture singers and albums
//! - Add the `MarketingBudget` column
//! - Set the fixture budgets
//! - Run one budget transfer
//!
//! Any failure in that sequence is fatal. The HTTP endpoint is then served
//! until shutdown; a failed request never stops the server.

use anyhow::Context;
use std::net::SocketAddr;
use tokio::sync::watch;

use crate::catalog::{
    add_marketing_budget_column, insert_fixtures, schema, set_marketing_budgets,
    transfer_marketing_budget, AlbumKey, Transfer, DEFAULT_BUDGETS,
};
use crate::config::Config;
use crate::http::{run_http_server, AppState};
use crate::storage::{Client, DatabaseAdmin, DatabasePath, Error, InstanceAdmin, StoreOptions};

/// Create the instance and database if they do not exist yet.
pub async fn provision(path: &DatabasePath, options: &StoreOptions) -> anyhow::Result<()> {
    tracing::info!(instance = %path.instance_path(), "Creating instance");
    InstanceAdmin::new(options.root.clone())
        .create_instance(&path.instance_path())
        .await
        .with_context(|| format!("create instance {}", path.instance_path()))?;

    tracing::info!(database = %path, "Creating database");
    match DatabaseAdmin::new(options.clone())
        .create_database(path, schema::base_statements())
        .wait()
        .await
    {
        Ok(()) => Ok(()),
        Err(Error::AlreadyExists(_)) => {
            tracing::info!(database = %path, "Database already provisioned");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("create database {path}")),
    }
}

/// Seed the catalog, migrate it, and run the startup transfer.
pub async fn prepare_catalog(
    client: &Client,
    admin: &DatabaseAdmin,
    transfer_amount: i64,
) -> anyhow::Result<()> {
    insert_fixtures(client).await?;
    add_marketing_budget_column(admin, client.path()).await?;
    set_marketing_budgets(client, &DEFAULT_BUDGETS).await?;

    let transfer = Transfer::new(AlbumKey::new(2, 2), AlbumKey::new(1, 1), transfer_amount)?;
    transfer_marketing_budget(client, transfer).await?;
    Ok(())
}

/// Send `true` on `shutdown_tx` at the first SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("failed to listen for ctrl+c");
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        let _ = shutdown_tx.send(true);
    });
}

/// Run the Marquee service.
///
/// # Arguments
///
/// * `config` - Service configuration
/// * `shutdown_rx` - Receiver for shutdown signal
///
/// # Returns
///
/// Returns when the HTTP server has shut down.
pub async fn run_server(config: Config, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.http_port)
        .parse()
        .context("invalid listen address")?;
    let path = config.database_path()?;
    let options = config.store_options();

    if config.uses_emulator() {
        provision(&path, &options).await?;
    }

    let client = Client::connect(path.clone(), options.clone())
        .await
        .with_context(|| format!("connect to {path}"))?;
    let admin = DatabaseAdmin::new(options);

    prepare_catalog(&client, &admin, config.transfer_amount).await?;

    run_http_server(addr, AppState::new(client.clone(), config.album_limit), shutdown_rx).await?;

    client.close();
    tracing::info!("Server stopped");
    Ok(())
}
