//! Store error taxonomy and rusqlite error classification.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result alias for store operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the store client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to acquire session: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("{context}: {source}")]
    Sqlite {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The transaction lost a conflict and must be re-run from scratch.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to decode column {column}: {source}")]
    Decode {
        column: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

impl Error {
    /// Classify a rusqlite error raised while running a statement.
    pub(crate) fn sqlite(context: impl Into<String>, err: rusqlite::Error) -> Self {
        let context = context.into();
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::Aborted(format!("{context}: {err}"))
            }
            Some(ErrorCode::OperationInterrupted) => Self::Cancelled,
            Some(ErrorCode::ConstraintViolation) if is_key_conflict(&err) => {
                Self::AlreadyExists(format!("{context}: {err}"))
            }
            Some(ErrorCode::ConstraintViolation) => {
                Self::FailedPrecondition(format!("{context}: {err}"))
            }
            _ if is_duplicate_object(&err) => Self::AlreadyExists(format!("{context}: {err}")),
            _ => Self::Sqlite { context, source: err },
        }
    }

    /// Classify an error returned from a row decode closure.
    pub(crate) fn row(context: impl Into<String>, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::InvalidColumnType(_, name, _) => Self::Decode {
                column: name.clone(),
                source: err,
            },
            rusqlite::Error::FromSqlConversionFailure(idx, _, _)
            | rusqlite::Error::IntegralValueOutOfRange(idx, _) => Self::Decode {
                column: format!("#{idx}"),
                source: err,
            },
            rusqlite::Error::InvalidColumnName(name) => Self::Decode {
                column: name.clone(),
                source: err,
            },
            _ => Self::sqlite(context, err),
        }
    }

    pub(crate) fn from_join(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Task(err.to_string())
        }
    }

    /// True when the failure is a concurrency abort that a retry may resolve.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

/// Errors that can tell the retry loop whether the store aborted the attempt.
pub trait Retryable {
    fn is_aborted(&self) -> bool;
}

impl Retryable for Error {
    fn is_aborted(&self) -> bool {
        Error::is_aborted(self)
    }
}

fn is_key_conflict(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        ),
        _ => false,
    }
}

fn is_duplicate_object(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => {
            msg.starts_with("duplicate column name") || msg.ends_with("already exists")
        }
        _ => false,
    }
}
