//! Marquee: a transactional album catalog over an embedded SQL store.
//!
//! Marquee seeds a small Singers/Albums catalog, evolves its schema, moves
//! marketing budget between albums inside optimistic-concurrency transactions,
//! and serves the most recently updated albums over HTTP.
//!
//! # Architecture
//!
//! - **Store client**: pooled SQLite sessions, abort-and-retry read-write
//!   transactions, store-assigned commit timestamps
//! - **Catalog**: schema migrator, blind mutation writer, budget transfer
//!   engine, and read-only album queries
//! - **Observable**: structured tracing and OpenTelemetry metrics
//!
//! # Modules
//!
//! - [`catalog`]: Singers/Albums data core
//! - [`config`]: CLI and environment configuration
//! - [`health`]: gRPC health-check service
//! - [`http`]: HTTP read endpoint
//! - [`observability`]: Metrics and tracing setup
//! - [`proto`]: Re-exported protobuf code
//! - [`server`]: Serving lifecycle
//! - [`storage`]: Store client and administration

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::StoreOptions is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod catalog;
pub mod config;
pub mod health;
pub mod http;
pub mod observability;
pub mod proto;
pub mod server;
pub mod storage;

/// Get the current Unix timestamp in microseconds.
#[must_use]
pub fn now_micros() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
