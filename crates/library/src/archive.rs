//! The consumed archive interface.
//!
//! Container parsing (ZIP et al.) happens outside this crate; importers
//! only need a name, an entry listing, and whole-entry reads. The filename
//! shortening rule lives here too since it is a property of archives, not
//! of any particular import strategy.

use async_trait::async_trait;
use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reading an archive.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The named entry does not exist in the archive.
    #[display("no such archive entry: {_0}")]
    MissingEntry(#[error(not(source))] String),
    /// The container is corrupt or otherwise unreadable.
    #[display("unreadable archive")]
    Unreadable,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// A readable archive of named byte streams.
///
/// Implementations are expected to be cheap to query repeatedly; the
/// import pipeline reads some entries more than once (fingerprint, then
/// store population).
#[async_trait]
pub trait ArchiveReader: Send + Sync {
    /// Display name of the archive (usually the source filename).
    fn name(&self) -> &str;

    /// Relative paths of every entry, in container order.
    fn filenames(&self) -> Vec<String>;

    /// Complete contents of one entry.
    async fn read(&self, filename: &str) -> Result<Vec<u8>>;
}

/// Shortens archive entry names for storage.
///
/// Standardizes separators to `/`, then strips the longest common prefix
/// of all entries if that prefix ends in a separator. A set zipped inside
/// a single top-level folder therefore stores the same filenames as one
/// zipped flat.
pub fn shorten_filenames(filenames: &[String]) -> Vec<String> {
    let standardized: Vec<String> = filenames.iter().map(|f| f.replace('\\', "/")).collect();
    let prefix = match standardized.split_first() {
        Some((first, rest)) => {
            let mut prefix = first.as_str();
            for name in rest {
                let common = prefix
                    .char_indices()
                    .zip(name.chars())
                    .take_while(|((_, a), b)| a == b)
                    .count();
                prefix = &prefix[..prefix
                    .char_indices()
                    .nth(common)
                    .map(|(i, _)| i)
                    .unwrap_or(prefix.len())];
            }
            // Only a prefix ending in a separator counts as a shared folder.
            match prefix.rfind('/') {
                Some(idx) => &prefix[..=idx],
                None => "",
            }
        },
        None => "",
    }
    .to_string();
    standardized
        .into_iter()
        .map(|name| match name.strip_prefix(prefix.as_str()) {
            Some(stripped) if !stripped.is_empty() => stripped.to_string(),
            _ => name,
        })
        .collect()
}

#[cfg(any(test, feature = "mock"))]
mod memory {
    use super::{ArchiveReader, ErrorKind, Result};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    /// In-memory archive for testing.
    ///
    /// Entries iterate in name order, which keeps fingerprints stable
    /// across test runs regardless of insertion order.
    pub struct MemoryArchive {
        name: String,
        entries: BTreeMap<String, Vec<u8>>,
    }

    impl MemoryArchive {
        pub fn new(name: impl Into<String>) -> Self {
            Self { name: name.into(), entries: BTreeMap::new() }
        }

        /// Builder-style entry insertion.
        pub fn with_entry(mut self, filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
            self.entries.insert(filename.into(), data.into());
            self
        }
    }

    #[async_trait]
    impl ArchiveReader for MemoryArchive {
        fn name(&self) -> &str {
            &self.name
        }

        fn filenames(&self) -> Vec<String> {
            self.entries.keys().cloned().collect()
        }

        async fn read(&self, filename: &str) -> Result<Vec<u8>> {
            match self.entries.get(filename) {
                Some(data) => Ok(data.clone()),
                None => exn::bail!(ErrorKind::MissingEntry(filename.to_string())),
            }
        }
    }
}

#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryArchive;
