//! Blob Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Every filesystem failure collapses into [`Io`](ErrorKind::Io): the blob
/// store has no recovery strategy beyond "retry or report", so callers only
/// need the offending path. The causing `std::io::Error` travels in the
/// `exn` tree.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Underlying I/O failure at the given path.
    #[display("I/O failure: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// Path contains invalid characters or escapes the storage root.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
