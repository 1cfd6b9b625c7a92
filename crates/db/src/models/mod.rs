//! Typed records of the asset schema.
//!
//! Each record type pairs an in-memory model with a private `*Row` struct
//! mirroring its table layout; `TryFrom` converts both ways. Value records
//! (metadata, difficulty) have no table of their own; they flatten into
//! their owner's row and split back out on load.

mod beatmap;
mod beatmap_set;
mod file;
mod metadata;
mod ruleset;

pub use self::beatmap::Beatmap;
pub use self::beatmap_set::BeatmapSet;
pub use self::file::{File, NamedFileUsage};
pub use self::metadata::{BeatmapDifficulty, BeatmapMetadata};
pub use self::ruleset::Ruleset;

use crate::error::Result;
use async_trait::async_trait;
use sqlx::SqliteConnection;

/// A persisted record with a stable primary key.
///
/// The session layer is generic over this trait: `all`, `find`, `add` and
/// `remove` delegate here, and [`Live`](crate::Live) handles resolve
/// through [`fetch`](Record::fetch). Implementations own their SQL.
#[async_trait]
pub trait Record: Clone + Send + Sync + Unpin + 'static {
    /// Primary key type (content hash, online id, or GUID).
    type Key: Clone + PartialEq + Send + Sync + 'static;

    fn primary_key(&self) -> Self::Key;

    async fn fetch_all(conn: &mut SqliteConnection) -> Result<Vec<Self>>;
    async fn fetch(conn: &mut SqliteConnection, key: &Self::Key) -> Result<Option<Self>>;
    async fn insert(&self, conn: &mut SqliteConnection) -> Result<()>;
    async fn upsert(&self, conn: &mut SqliteConnection) -> Result<()>;
    async fn delete(&self, conn: &mut SqliteConnection) -> Result<()>;
}
