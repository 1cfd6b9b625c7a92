//! Blob storage for the mapstash asset library.
//!
//! Abstracts the directory that backs the content-addressed file store.
//! Consumers address blobs by relative path only; the [`BlobBackend`] trait
//! hides where (and whether) the bytes physically live, which keeps the
//! database and importer crates testable without touching a real disk.

pub mod backend;
pub mod error;
mod path;

pub use crate::backend::BlobBackend;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn BlobBackend + Send + Sync>;
