//! Blob backend trait and implementations.
//!
//! The `BlobBackend` trait is the seam between the content-addressed file
//! store and the filesystem. The library only ever needs five operations;
//! enumeration of known blobs happens through the database, never the disk.

mod local;
#[cfg(feature = "mock")]
mod memory;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::memory::MemoryBackend;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Unified interface for blob storage.
///
/// All paths are relative to the storage root and are validated with
/// [`validate_path`](crate::validate_path) before use; implementations must
/// enforce this. There is no caching and no locking beyond what the
/// underlying filesystem provides.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use mapstash_storage::{BlobBackend, error::Result};
///
/// async fn blob_size(backend: &dyn BlobBackend, path: &Path) -> Result<u64> {
///     if backend.exists(path).await? {
///         Ok(backend.read(path).await?.len() as u64)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Check if a blob exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read a blob's complete contents.
    ///
    /// A missing blob surfaces as [`Io`](crate::error::ErrorKind::Io) with
    /// the causing `NotFound` in the error tree; callers that care should
    /// probe with [`exists`](Self::exists) first.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write a blob, creating parent directories as needed.
    ///
    /// Overwrites any existing blob at the path.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a blob.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Recursively delete every blob under the storage root.
    ///
    /// The root directory itself is kept.
    async fn delete_all(&self) -> Result<()>;
}
