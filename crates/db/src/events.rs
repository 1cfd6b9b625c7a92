//! Change notifications.
//!
//! Events are buffered on the write transaction that caused them and only
//! dispatched once that transaction commits; a rolled-back transaction
//! discards its buffer. Observers therefore never see a record that will
//! later turn out not to exist.

use uuid::Uuid;

/// A change to the persisted library, published after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A new beatmap set was imported.
    BeatmapSetAdded(Uuid),
    /// An existing beatmap set was modified (including soft-delete flips).
    BeatmapSetUpdated(Uuid),
    /// A beatmap set was purged from the database.
    BeatmapSetRemoved(Uuid),
}
