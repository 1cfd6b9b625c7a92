//! Database Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A database error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong
/// internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Engine-level failure (query, connection, pool).
    #[display("database error")]
    Database,
    /// The backing database file could not be acquired.
    #[display("database storage unavailable")]
    StorageUnavailable,
    /// A schema migration failed while opening the database.
    #[display("schema migration failed")]
    SchemaMigrationFailed,
    /// The session manager has been closed.
    #[display("database has been closed")]
    Closed,
    /// A mutation was attempted outside of a write transaction.
    #[display("not inside a write transaction")]
    NotInTransaction,
    /// The referenced record does not exist (or no longer exists).
    #[display("record not found")]
    NotFound,
    /// An insert collided with an existing primary key.
    #[display("duplicate primary key")]
    DuplicatePrimaryKey,
    /// Session-bound state was touched outside the scope it is pinned to.
    #[display("managed object leaked out of its session scope")]
    LeakedManagedObject,
    /// A transaction rollback itself failed.
    #[display("transaction rollback failed")]
    Rollback,
    /// Row/record conversion failure.
    #[display("invalid database data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::StorageUnavailable)
    }
}
