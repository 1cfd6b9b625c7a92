//! In-memory blob backend for testing.

use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::BlobBackend;

/// In-memory blob backend for testing.
///
/// Blobs live in a `HashMap` behind a [`RwLock`], so all trait methods can
/// operate on `&self` without external synchronisation. Ideal for unit tests
/// that need a [`BlobBackend`] without filesystem dependencies.
///
/// # Examples
///
/// ```
/// use mapstash_storage::backend::MemoryBackend;
/// use mapstash_storage::BlobBackend;
/// use mapstash_storage::error::Result;
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<()> {
/// let backend = MemoryBackend::with_blobs([
///     ("a/ab/abcdef", b"contents".as_slice()),
/// ]);
/// assert!(backend.exists(Path::new("a/ab/abcdef")).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryBackend {
    storage: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create a backend pre-populated with blobs.
    ///
    /// Panics on an invalid path. This type is intended for tests; if test
    /// setup is wrong, the test should not pass.
    pub fn with_blobs(
        blobs: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>,
    ) -> Self {
        let mut map = HashMap::new();
        for (path, data) in blobs {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MemoryBackend::with_blobs: invalid path {}", path.display());
            };
            map.insert(validated, data.into());
        }
        Self { storage: RwLock::new(map) }
    }

    fn missing(path: PathBuf) -> crate::error::Error {
        use exn::ResultExt;
        let io = io::Error::new(io::ErrorKind::NotFound, "no such blob");
        Err::<(), _>(io).or_raise(|| ErrorKind::Io(path)).unwrap_err()
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        self.storage.read().await.get(&path).cloned().ok_or_else(|| Self::missing(path))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.insert(path, data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| Self::missing(path))
    }

    async fn delete_all(&self) -> Result<()> {
        self.storage.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MemoryBackend::default();
        backend.write(Path::new("blob"), b"hello").await.unwrap();
        assert_eq!(backend.read(Path::new("blob")).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_read_missing_is_io() {
        let backend = MemoryBackend::default();
        let err = backend.read(Path::new("missing")).await.unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::Io(_)));
    }

    #[tokio::test]
    async fn test_delete_and_delete_all() {
        let backend = MemoryBackend::with_blobs([("one", b"1".as_slice()), ("two", b"2".as_slice())]);
        backend.delete(Path::new("one")).await.unwrap();
        assert!(!backend.exists(Path::new("one")).await.unwrap());
        backend.delete_all().await.unwrap();
        assert!(!backend.exists(Path::new("two")).await.unwrap());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MemoryBackend::default();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"bad").await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_blobs_panics_on_bad_path() {
        MemoryBackend::with_blobs([("../escape", b"bad".as_slice())]);
    }
}
