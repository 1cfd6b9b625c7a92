//! Library maintenance passes.

use mapstash_db::error::Result;
use mapstash_db::{Database, StoreEvent};
use tracing::info;

/// Complete two-phase deletion: remove every set flagged `delete_pending`.
///
/// Protected sets are never purged. Cascades take the sets' beatmaps and
/// file usages along; the blobs freed up by the dropped usages become
/// garbage for the next [`FileStore::cleanup`](crate::FileStore::cleanup).
/// Returns the number of sets removed.
pub async fn purge_pending(db: &Database) -> Result<usize> {
    let mut session = db.write_session().await?;
    let mut tx = session.begin_write().await?;
    let pending = tx.sets_pending_deletion().await?;
    let purged = pending.len();
    for set in pending {
        tx.remove(&set).await?;
        tx.notify(StoreEvent::BeatmapSetRemoved(set.id));
    }
    tx.commit().await?;
    if purged > 0 {
        info!(purged, "purged beatmap sets pending deletion");
    }
    Ok(purged)
}
