//! Configuration parsing for Marquee.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for everything except the database address

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::{DatabasePath, Error, StoreOptions};

/// Marquee: transactional album catalog service.
#[derive(Parser, Debug, Clone)]
#[command(name = "marquee")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Project identifier
    #[arg(long, env = "GCLOUD_PROJECT")]
    pub project: String,

    /// Store instance identifier
    #[arg(long, env = "MARQUEE_SPANNER_INSTANCE_ID")]
    pub instance: String,

    /// Store database identifier
    #[arg(long, env = "MARQUEE_SPANNER_DATABASE_ID")]
    pub database: String,

    /// Local emulator root; when set the instance and database are created on startup
    #[arg(long, env = "SPANNER_EMULATOR_HOST")]
    pub emulator_dir: Option<PathBuf>,

    /// Root directory of the store when no emulator is configured
    #[arg(long, env = "MARQUEE_STORE_ROOT", default_value = "./data")]
    pub store_root: PathBuf,

    /// Host address to bind to
    #[arg(long, env = "MARQUEE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the HTTP read endpoint
    #[arg(long, env = "MARQUEE_HTTP_PORT", default_value_t = 8000)]
    pub http_port: u16,

    /// Maximum number of pooled store sessions
    #[arg(long, env = "MARQUEE_POOL_SIZE", default_value_t = 8)]
    pub pool_size: u32,

    /// Attempts before a contended transaction is given up
    #[arg(long, env = "MARQUEE_MAX_COMMIT_ATTEMPTS", default_value_t = 16)]
    pub max_commit_attempts: u32,

    /// How long a statement waits for another writer's lock, in milliseconds
    #[arg(long, env = "MARQUEE_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// Marketing budget moved by the startup transfer
    #[arg(long, env = "MARQUEE_TRANSFER_AMOUNT", default_value_t = 200_000)]
    pub transfer_amount: i64,

    /// Default number of albums returned by GET /albums
    #[arg(long, env = "MARQUEE_ALBUM_LIMIT", default_value_t = 3)]
    pub album_limit: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MARQUEE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    ///
    /// Exits the process with a usage error if a required value is missing.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The logical database this process serves.
    pub fn database_path(&self) -> Result<DatabasePath, Error> {
        DatabasePath::new(&self.project, &self.instance, &self.database)
    }

    /// Whether the store client is redirected to a local emulator.
    pub fn uses_emulator(&self) -> bool {
        self.emulator_dir.is_some()
    }

    /// Store client options derived from this configuration.
    pub fn store_options(&self) -> StoreOptions {
        let root = self
            .emulator_dir
            .clone()
            .unwrap_or_else(|| self.store_root.clone());
        StoreOptions {
            root,
            pool_size: self.pool_size,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            max_commit_attempts: self.max_commit_attempts.max(1),
            ..StoreOptions::default()
        }
    }

    /// Create a configuration for testing against an emulator root.
    #[cfg(test)]
    pub fn test_config(emulator_dir: PathBuf) -> Self {
        Self {
            project: "test-project".into(),
            instance: "test-instance".into(),
            database: "test-db".into(),
            emulator_dir: Some(emulator_dir),
            store_root: PathBuf::from("./data"),
            host: "127.0.0.1".into(),
            http_port: 0,
            pool_size: 4,
            max_commit_attempts: 16,
            busy_timeout_ms: 1000,
            transfer_amount: 200_000,
            album_limit: 3,
            log_level: "debug".into(),
            otel_endpoint: None,
        }
    }
}

/// Health-check RPC server configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "marquee-health")]
#[command(author, version, about = "Marquee health-check gRPC server", long_about = None)]
pub struct HealthConfig {
    /// Host address to bind to
    #[arg(long, env = "MARQUEE_HEALTH_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to serve on
    #[arg(short, long, env = "MARQUEE_HEALTH_PORT", default_value_t = 50051)]
    pub port: u16,

    /// Value of the `location` header sent with every response
    #[arg(long, env = "MARQUEE_HEALTH_LOCATION", default_value = "MTV")]
    pub location: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MARQUEE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 7] = [
        "marquee",
        "--project",
        "p",
        "--instance",
        "i",
        "--database",
        "d",
    ];

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(REQUIRED).unwrap();
        assert_eq!(config.http_port, 8000);
        assert_eq!(config.transfer_amount, 200_000);
        assert_eq!(config.album_limit, 3);
        assert_eq!(
            config.database_path().unwrap().to_string(),
            "projects/p/instances/i/databases/d"
        );
    }

    #[test]
    fn test_missing_required_is_an_error() {
        // Only meaningful when the environment does not supply the value.
        if std::env::var_os("MARQUEE_SPANNER_DATABASE_ID").is_none() {
            assert!(Config::try_parse_from(&REQUIRED[..5]).is_err());
        }
    }

    #[test]
    fn test_emulator_redirects_store_root() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--emulator-dir", "/tmp/emu", "--store-root", "/srv/data"]);
        let config = Config::try_parse_from(args).unwrap();

        assert!(config.uses_emulator());
        assert_eq!(config.store_options().root, PathBuf::from("/tmp/emu"));
    }

    #[test]
    fn test_health_defaults() {
        let config = HealthConfig::try_parse_from(["marquee-health"]).unwrap();
        assert_eq!(config.port, 50051);
        assert_eq!(config.location, "MTV");
    }
}
