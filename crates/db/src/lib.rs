//! Embedded object database for the mapstash asset library.
//!
//! This crate owns the single SQLite file that backs the library and
//! multiplexes access to it through three kinds of sessions:
//!
//! - the long-lived **update session**, owned by whichever task holds its
//!   guard (the host's update loop), refreshed on the host's tick;
//! - transient **read sessions**, any task, many at once, each pinned to a
//!   point-in-time snapshot of the database;
//! - transient **write sessions**, serialized by a global write permit.
//!
//! On top of the sessions sit the typed records of the asset schema and
//! [`Live`] handles: task- and thread-portable references to persisted
//! records by primary key.

pub mod error;
mod events;
mod live;
mod models;
mod session;
mod store;

pub use crate::events::StoreEvent;
pub use crate::live::{Live, ThreadBound};
pub use crate::models::{
    Beatmap, BeatmapDifficulty, BeatmapMetadata, BeatmapSet, File, NamedFileUsage, Record, Ruleset,
};
pub use crate::session::{Session, WriteTransaction};
pub use crate::store::{Database, DatabaseOptions, OperationBlock, UpdateSession};

/// Filename of the database inside the storage root.
pub const DATABASE_FILENAME: &str = "client.stash";
