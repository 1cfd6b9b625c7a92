//! Error types for the [`import`](super) module.
//!
//! Uses [`exn`] for automatic location tracking and error tree
//! construction.

use derive_more::{Display, Error};

/// An import error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of an import failure.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The operation's cancellation token fired.
    #[display("import cancelled")]
    Cancelled,
    /// The archive produced no usable model (stage 1).
    #[display("model creation failed")]
    ModelCreationFailed,
    /// The populate hook failed while decoding or constructing records.
    #[display("populating the model failed")]
    PopulateFailed,
    /// Rolling back the in-flight transaction itself failed.
    #[display("import rollback failed")]
    Rollback,
    /// A database session or query failed.
    #[display("import database operation failed")]
    Database,
    /// An archive or blob read failed.
    #[display("import storage operation failed")]
    Storage,
    /// The content-addressed file store failed.
    #[display("import file store operation failed")]
    Files,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::Storage | Self::Files)
    }
}
