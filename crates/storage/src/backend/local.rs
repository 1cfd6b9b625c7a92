//! Local filesystem blob backend.
//!
//! Stores blobs under a configured root directory using `tokio::fs` for
//! async I/O.

use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Path, PathBuf};

use crate::error::ErrorKind;
use crate::{BlobBackend, error::Result, path::validate as validate_path};

/// Local filesystem blob backend.
///
/// All paths are relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use mapstash_storage::backend::LocalBackend;
/// use mapstash_storage::error::Result;
///
/// # fn example() -> Result<()> {
/// let backend = LocalBackend::new("/path/to/stash/files")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    /// Root directory for all blobs
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if `root` is not
    /// absolute.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root.to_path_buf()));
        }
        Ok(Self { root: root.to_path_buf() })
    }

    /// Get the absolute path for a relative blob path.
    ///
    /// Validates the path and joins it with the root directory.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }
}

#[async_trait]
impl BlobBackend for LocalBackend {
    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs = self.absolute_path(path)?;
        tokio::fs::try_exists(&abs).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs = self.absolute_path(path)?;
        tokio::fs::read(&abs).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs = self.absolute_path(path)?;
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        }
        tokio::fs::write(&abs, data).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs = self.absolute_path(path)?;
        tokio::fs::remove_file(&abs).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))
    }

    async fn delete_all(&self) -> Result<()> {
        let mut entries =
            tokio::fs::read_dir(&self.root).await.or_raise(|| ErrorKind::Io(self.root.clone()))?;
        while let Some(entry) =
            entries.next_entry().await.or_raise(|| ErrorKind::Io(self.root.clone()))?
        {
            let path = entry.path();
            let meta = entry.metadata().await.or_raise(|| ErrorKind::Io(path.clone()))?;
            if meta.is_dir() {
                tokio::fs::remove_dir_all(&path).await.or_raise(|| ErrorKind::Io(path.clone()))?;
            } else {
                tokio::fs::remove_file(&path).await.or_raise(|| ErrorKind::Io(path.clone()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_absolute_path() {
        assert!(LocalBackend::new("/absolute/path").is_ok());
        assert!(LocalBackend::new("relative/path").is_err());
        assert!(LocalBackend::new("./relative").is_err());
    }

    #[test]
    fn test_absolute_path() {
        let backend = LocalBackend::new("/stash").unwrap();
        assert_eq!(
            backend.absolute_path(Path::new("6/69/692ed948")).unwrap(),
            PathBuf::from("/stash/6/69/692ed948")
        );
        // Path traversal is prevented
        assert!(backend.absolute_path(Path::new("../etc/passwd")).is_err());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();
        let data = b"osu file format v14";
        backend.write(Path::new("test.osu"), data).await.unwrap();
        assert_eq!(backend.read(Path::new("test.osu")).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();
        backend.write(Path::new("6/69/692ed948"), b"data").await.unwrap();
        assert!(backend.exists(Path::new("6/69/692ed948")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();
        assert!(!backend.exists(Path::new("nonexistent")).await.unwrap());
        backend.write(Path::new("exists"), b"data").await.unwrap();
        assert!(backend.exists(Path::new("exists")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();
        backend.write(Path::new("file"), b"data").await.unwrap();
        backend.delete(Path::new("file")).await.unwrap();
        assert!(!backend.exists(Path::new("file")).await.unwrap());
        // Deleting a missing blob is an I/O failure
        let err = backend.delete(Path::new("file")).await.unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::Io(_)));
    }

    #[tokio::test]
    async fn test_delete_all() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();
        backend.write(Path::new("a/aa/blob1"), b"1").await.unwrap();
        backend.write(Path::new("b/bb/blob2"), b"2").await.unwrap();
        backend.write(Path::new("loose"), b"3").await.unwrap();
        backend.delete_all().await.unwrap();
        assert!(!backend.exists(Path::new("a/aa/blob1")).await.unwrap());
        assert!(!backend.exists(Path::new("b/bb/blob2")).await.unwrap());
        assert!(!backend.exists(Path::new("loose")).await.unwrap());
        // The root survives and remains writable
        backend.write(Path::new("again"), b"4").await.unwrap();
    }

    #[tokio::test]
    async fn test_path_security() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(temp_dir.path()).unwrap();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"data").await.is_err());
        assert!(backend.delete(Path::new("../../file")).await.is_err());
    }
}
