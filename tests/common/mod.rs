//! Test utilities for Marquee integration tests.
//!
//! Provides:
//! - An emulator root in a temporary directory
//! - A provisioned catalog database and store clients for it

#![allow(dead_code)]

use marquee::catalog::{insert_fixtures, set_marketing_budgets, DEFAULT_BUDGETS};
use marquee::server::provision;
use marquee::storage::{Client, DatabaseAdmin, DatabasePath, StoreOptions};
use std::time::Duration;
use tempfile::TempDir;

/// Test fixture that owns a provisioned catalog database.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Emulator root
    pub temp_dir: TempDir,
    pub path: DatabasePath,
    pub options: StoreOptions,
}

impl TestFixture {
    /// Provision an empty catalog database.
    pub async fn new() -> Self {
        marquee::observability::tracing::init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = DatabasePath::new("test-project", "test-instance", "catalog")
            .expect("invalid database path");
        let options = StoreOptions {
            // Contended tests need a deeper retry budget than the default.
            max_commit_attempts: 64,
            retry_backoff: Duration::from_millis(1),
            retry_backoff_max: Duration::from_millis(20),
            ..StoreOptions::new(temp_dir.path())
        };
        provision(&path, &options)
            .await
            .expect("failed to provision database");
        Self {
            temp_dir,
            path,
            options,
        }
    }

    pub fn admin(&self) -> DatabaseAdmin {
        DatabaseAdmin::new(self.options.clone())
    }

    pub async fn client(&self) -> Client {
        Client::connect(self.path.clone(), self.options.clone())
            .await
            .expect("failed to connect")
    }

    /// Connect after writing the fixtures, the budget column, and the default
    /// budgets.
    pub async fn seeded_client(&self) -> Client {
        let client = self.client().await;
        insert_fixtures(&client).await.expect("failed to seed");
        marquee::catalog::add_marketing_budget_column(&self.admin(), &self.path)
            .await
            .expect("failed to migrate");
        set_marketing_budgets(&client, &DEFAULT_BUDGETS)
            .await
            .expect("failed to set budgets");
        client
    }
}
