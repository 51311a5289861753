//! The Singers/Albums catalog.
//!
//! - [`schema`]: base tables created when a database is provisioned
//! - [`migrate`]: additive schema changes
//! - [`seed`]: blind insert-or-update writes of fixture data and budgets
//! - [`transfer`]: guarded marketing budget transfer between two albums
//! - [`query`]: read-only listing of recently updated albums

pub mod migrate;
pub mod model;
pub mod query;
pub mod schema;
pub mod seed;
pub mod transfer;

use thiserror::Error;

use crate::storage::{self, Retryable};

pub use migrate::{add_column, add_marketing_budget_column, AddColumnOutcome, ColumnType};
pub use model::{Album, AlbumKey, AlbumSummary, Singer};
pub use query::{list_recent_albums, MAX_ALBUM_LIMIT};
pub use seed::{insert_fixtures, set_marketing_budgets, DEFAULT_BUDGETS};
pub use transfer::{transfer_marketing_budget, Transfer, TransferOutcome};

pub const SINGERS: &str = "Singers";
pub const ALBUMS: &str = "Albums";

pub const SINGER_ID: &str = "SingerId";
pub const FIRST_NAME: &str = "FirstName";
pub const LAST_NAME: &str = "LastName";
pub const SINGER_INFO: &str = "SingerInfo";
pub const ALBUM_ID: &str = "AlbumId";
pub const ALBUM_TITLE: &str = "AlbumTitle";
pub const MARKETING_BUDGET: &str = "MarketingBudget";
pub const LAST_UPDATE_TIME: &str = "LastUpdateTime";

/// Result alias for catalog operations.
pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

/// Errors raised by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A store call failed while performing `op`.
    #[error("{op}: {source}")]
    Store {
        op: String,
        #[source]
        source: storage::Error,
    },

    #[error("marketing budget of album {key} is not set")]
    BudgetUnset { key: AlbumKey },

    #[error("marketing budget of album {key} would overflow")]
    BudgetOverflow { key: AlbumKey },

    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),
}

impl CatalogError {
    /// The underlying store error, if this failure came from the store.
    pub fn store_error(&self) -> Option<&storage::Error> {
        match self {
            Self::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<storage::Error> for CatalogError {
    fn from(source: storage::Error) -> Self {
        Self::Store {
            op: "store call".into(),
            source,
        }
    }
}

impl Retryable for CatalogError {
    fn is_aborted(&self) -> bool {
        self.store_error().is_some_and(storage::Error::is_aborted)
    }
}

/// Attach the failing operation to store errors.
pub(crate) trait StoreContext<T> {
    fn context(self, op: impl FnOnce() -> String) -> Result<T>;
}

impl<T> StoreContext<T> for std::result::Result<T, storage::Error> {
    fn context(self, op: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| CatalogError::Store { op: op(), source })
    }
}

impl<T> StoreContext<T> for Result<T> {
    fn context(self, op: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|err| match err {
            CatalogError::Store { op: inner, source } => CatalogError::Store {
                op: format!("{}: {inner}", op()),
                source,
            },
            other => other,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_retryable_through_catalog_error() {
        let err = CatalogError::from(storage::Error::Aborted("conflict".into()));
        assert!(err.is_aborted());

        let err = CatalogError::BudgetUnset {
            key: AlbumKey::new(1, 1),
        };
        assert!(!err.is_aborted());
    }

    #[test]
    fn test_context_names_operation() {
        let result: std::result::Result<(), storage::Error> =
            Err(storage::Error::NotFound("row (2, 2) in table Albums".into()));
        let err = result.context(|| "transfer from (2, 2) to (1, 1)".into()).unwrap_err();

        assert_eq!(
            err.to_string(),
            "transfer from (2, 2) to (1, 1): row (2, 2) in table Albums not found"
        );
    }
}
