//! Additive schema changes.
//!
//! A column is added with a single DDL statement submitted as a long-running
//! operation; the call returns only once the store reports completion. Readers
//! and writers of the table are not blocked while it runs.

use std::fmt;

use super::{Result, StoreContext, ALBUMS, MARKETING_BUDGET};
use crate::storage::schema::quote_ident;
use crate::storage::{DatabaseAdmin, DatabasePath, Error};

/// Store column types that can be added to an existing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int64,
    String,
    Bytes,
    Timestamp,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Int64 | ColumnType::Timestamp => "INTEGER",
            ColumnType::String => "TEXT",
            ColumnType::Bytes => "BLOB",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Int64 => "INT64",
            ColumnType::String => "STRING",
            ColumnType::Bytes => "BYTES",
            ColumnType::Timestamp => "TIMESTAMP",
        };
        f.write_str(name)
    }
}

/// What [`add_column`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddColumnOutcome {
    Added,
    /// The store rejected the statement because the column already exists.
    AlreadyPresent,
}

/// Add a nullable `column` of type `ty` to `table` and wait for the change.
///
/// A duplicate column is reported through [`AddColumnOutcome::AlreadyPresent`]
/// and a warning; every other failure is returned.
pub async fn add_column(
    admin: &DatabaseAdmin,
    database: &DatabasePath,
    table: &str,
    column: &str,
    ty: ColumnType,
) -> Result<AddColumnOutcome> {
    let statement = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_ident(column),
        ty.sql()
    );

    let operation = admin.update_database_ddl(database, vec![statement]);
    tracing::debug!(operation = operation.name(), %table, %column, "Schema change submitted");

    match operation.wait().await {
        Ok(()) => {
            tracing::info!(%table, %column, %ty, "Added column");
            Ok(AddColumnOutcome::Added)
        }
        Err(Error::AlreadyExists(reason)) => {
            tracing::warn!(%table, %column, %reason, "Column already exists, schema unchanged");
            Ok(AddColumnOutcome::AlreadyPresent)
        }
        Err(err) => Err(err).context(|| format!("add column {column} to {table}")),
    }
}

/// Add the nullable `MarketingBudget` column to `Albums`.
pub async fn add_marketing_budget_column(
    admin: &DatabaseAdmin,
    database: &DatabasePath,
) -> Result<AddColumnOutcome> {
    add_column(admin, database, ALBUMS, MARKETING_BUDGET, ColumnType::Int64).await
}
