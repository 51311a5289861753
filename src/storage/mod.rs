//! SQLite-backed store client.
//!
//! Provides:
//! - Database addressing and administration (instances, databases, DDL)
//! - Pooled sessions with cancellation
//! - Read-write transactions re-run on optimistic-concurrency aborts
//! - Store-assigned commit timestamps
//! - Single-use read-only queries

pub mod admin;
pub mod client;
pub mod error;
pub mod mutation;
pub mod path;
pub mod schema;
pub mod statement;
pub mod value;

pub use admin::{DatabaseAdmin, DdlOperation, InstanceAdmin, InstanceState};
pub use client::{
    CancelFlag, Client, CommitResponse, ReadOnlyTransaction, ReadWriteTransaction, Session,
    StoreOptions,
};
pub use error::{Error, Result, Retryable};
pub use mutation::{Mutation, MutationOp};
pub use path::{DatabasePath, InstancePath};
pub use statement::Statement;
pub use value::{Key, Timestamp, Value};
