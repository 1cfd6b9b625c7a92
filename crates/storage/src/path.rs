//! Path validation and security utilities.
//!
//! Blob paths are always relative to the storage root. This module rejects
//! anything that could escape it.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a blob path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// # Returns
/// Returns the normalized path if valid, or
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath) if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use mapstash_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("6/69/692ed948").is_ok());
/// assert!(validate_path("a/../file.osu").is_ok()); // (never leaves the root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves the root)
/// assert!(validate_path("a\0b").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let reject = || ErrorKind::InvalidPath(path.as_ref().to_path_buf());
    let mut kept = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(part) => {
                // A NUL would truncate the path at the syscall boundary.
                if part.as_encoded_bytes().contains(&0) {
                    exn::bail!(reject());
                }
                kept.push(part)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(reject()),
            // ".." may only consume components already seen; anything else
            // would resolve above the storage root.
            Component::ParentDir => {
                if kept.pop().is_none() {
                    exn::bail!(reject());
                }
            },
        }
    }
    if kept.is_empty() {
        exn::bail!(reject());
    }
    Ok(kept.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(
            validate(Path::new("6/69/692ed948ccd76c22")).unwrap(),
            Path::new("6/69/692ed948ccd76c22")
        );
        assert_eq!(validate(Path::new("audio.mp3")).unwrap(), Path::new("audio.mp3"));
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(validate(Path::new("a//b//c")).unwrap(), Path::new("a/b/c"));
        assert_eq!(validate(Path::new("a/./b/./c")).unwrap(), Path::new("a/b/c"));
        // Traversal that remains within the root resolves
        assert_eq!(validate(Path::new("a/b/..")).unwrap(), Path::new("a"));
    }

    #[test]
    fn test_traversal_attempts() {
        assert!(validate(Path::new("../etc/passwd")).is_err());
        assert!(validate(Path::new("a/../../b")).is_err());
        assert!(validate(Path::new("..")).is_err());
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate(Path::new("a\0b")).is_err());
        assert!(validate(Path::new("\0")).is_err());
    }

    #[test]
    fn test_empty_paths() {
        assert!(validate(Path::new("")).is_err());
        assert!(validate(Path::new(".")).is_err());
        assert!(validate(Path::new("//")).is_err());
    }
}
