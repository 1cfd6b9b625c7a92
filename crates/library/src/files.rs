//! The content-addressed file store.
//!
//! Deduplicates blobs on disk by SHA-256 and reclaims them by backlink
//! count. Record-side state lives in the database ([`File`] rows plus
//! usage embeddings); byte-side state lives behind a [`BlobBackend`]. The
//! store's job is keeping the two in agreement: after any successful
//! [`add`](FileStore::add) the blob on disk hashes to the record's primary
//! key, and after [`cleanup`](FileStore::cleanup) no zero-usage record
//! remains.

use derive_more::{Display, Error as DeriveError};
use exn::ResultExt;
use mapstash_db::{Database, File, Session};
use mapstash_storage::backend::LocalBackend;
use mapstash_storage::BackendHandle;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// A file store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for file store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a file store failure.
#[derive(Debug, Display, DeriveError)]
pub enum ErrorKind {
    /// A database query or mutation failed.
    #[display("file store database operation failed")]
    Database,
    /// A blob backend operation failed.
    #[display("file store blob operation failed")]
    Storage,
    /// [`add`](FileStore::add) was called outside a write transaction.
    #[display("file store mutation outside a write transaction")]
    NotInTransaction,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}

/// Directory under the storage root that holds the blob fan-out.
pub const FILES_DIR: &str = "files";

/// Lowercase hex SHA-256 of `data`.
pub fn hash_of(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// The content-addressed file store.
///
/// Cheap to clone; clones share the backend handle.
#[derive(Clone)]
pub struct FileStore {
    backend: BackendHandle,
}

impl FileStore {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend }
    }

    /// A store over `<storage_root>/files` on the local filesystem, the
    /// conventional layout next to the database file.
    pub fn local(storage_root: impl AsRef<Path>) -> Result<Self> {
        let backend = LocalBackend::new(storage_root.as_ref().join(FILES_DIR))
            .or_raise(|| ErrorKind::Storage)?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Store `data`, deduplicating by content hash.
    ///
    /// Must be called inside an active write transaction on `session`.
    /// The blob is (re)written when it is absent or its on-disk bytes no
    /// longer hash to the record key, so a corrupted copy is silently
    /// repaired. Idempotent: repeated calls with identical content return
    /// the same [`File`] and write nothing new.
    pub async fn add(&self, session: &mut Session, data: &[u8]) -> Result<File> {
        if !session.is_writing() {
            exn::bail!(ErrorKind::NotInTransaction);
        }
        let file = File::new(hash_of(data));
        let path = file.storage_path().or_raise(|| ErrorKind::Database)?;

        let existing = session.find::<File>(&file.hash).await.or_raise(|| ErrorKind::Database)?;
        if self.needs_write(&path, &file.hash).await? {
            self.backend.write(&path, data).await.or_raise(|| ErrorKind::Storage)?;
        }
        if existing.is_none() {
            session.add(&file, false).await.or_raise(|| ErrorKind::Database)?;
        }
        Ok(file)
    }

    /// Read a stored blob back.
    ///
    /// A record whose hash cannot derive a blob path (corrupt key) fails
    /// with [`Database`](ErrorKind::Database) like any other bad record.
    pub async fn read(&self, file: &File) -> Result<Vec<u8>> {
        let path = file.storage_path().or_raise(|| ErrorKind::Database)?;
        self.backend.read(&path).await.or_raise(|| ErrorKind::Storage)
    }

    async fn needs_write(&self, path: &Path, expected_hash: &str) -> Result<bool> {
        if !self.backend.exists(path).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(true);
        }
        let on_disk = self.backend.read(path).await.or_raise(|| ErrorKind::Storage)?;
        Ok(hash_of(&on_disk) != expected_hash)
    }

    /// Garbage-collect files whose backlink count has reached zero.
    ///
    /// Opens its own write session and transaction. Each dead record is
    /// removed and its blob deleted; blob-deletion failures are logged and
    /// skipped so the remaining files still get processed. Returns the
    /// number of records removed.
    pub async fn cleanup(&self, db: &Database) -> Result<usize> {
        let mut session = db.write_session().await.or_raise(|| ErrorKind::Database)?;
        let mut tx = session.begin_write().await.or_raise(|| ErrorKind::Database)?;
        let dead = tx.files_without_usages().await.or_raise(|| ErrorKind::Database)?;
        let removed = dead.len();
        for file in dead {
            tx.remove(&file).await.or_raise(|| ErrorKind::Database)?;
            // Blob-side failures never abort the pass; a record with a
            // corrupt key has no blob path to delete in the first place.
            match file.storage_path() {
                Ok(path) => {
                    if let Err(e) = self.backend.delete(&path).await {
                        warn!(hash = %file.hash, error = ?e, "could not delete unreferenced blob");
                    }
                },
                Err(e) => warn!(hash = %file.hash, error = ?e, "unreferenced record has no valid blob path"),
            }
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(removed)
    }
}
