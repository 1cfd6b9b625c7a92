//! The archive importer pipeline.
//!
//! Stages, in order: create the skeletal model from the archive, fast
//! fingerprint, early-skip against an existing set, populate inside a
//! write transaction (file store, decode hook, online-id sanitation),
//! collision resolution, commit. Any failure between populate and commit
//! rolls the transaction back, so neither file records nor the set
//! persist; blobs already written become garbage for the next cleanup.
//!
//! Outward notifications are buffered on the transaction and only
//! dispatched on commit.

mod beatmap;
pub mod error;
mod queue;
mod strategy;

pub use self::beatmap::BeatmapStrategy;
pub use self::queue::Priority;
pub use self::strategy::{ImportStrategy, SetContents};

use self::error::{ErrorKind, Result};
use self::queue::ImportQueues;
use crate::archive::{ArchiveReader, shorten_filenames};
use crate::decode::BeatmapDecoder;
use crate::files::{FileStore, hash_of};
use exn::ResultExt;
use mapstash_db::{
    Beatmap, BeatmapSet, Database, File, Live, NamedFileUsage, Session, StoreEvent,
    WriteTransaction,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// One archive entry under both its source and shortened names.
///
/// The source name addresses the entry inside the container; the shortened
/// name is what gets persisted and what ordering/fingerprinting use.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub source: String,
    pub shortened: String,
}

/// Whether a filename participates in the archive fingerprint.
pub(crate) fn is_hashable(filename: &str, extensions: &[&str]) -> bool {
    let lower = filename.to_ascii_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

enum Outcome {
    /// The new set was inserted; commit and hand out its handle.
    Fresh,
    /// An existing set stands in; roll back and resurrect it.
    Reuse(BeatmapSet),
}

/// The importer: one strategy, one database, one blob store, two serial
/// submission queues.
pub struct Importer {
    db: Database,
    files: FileStore,
    strategy: Arc<dyn ImportStrategy>,
    queues: ImportQueues,
}

impl Importer {
    pub fn new(db: Database, files: FileStore, strategy: Arc<dyn ImportStrategy>) -> Self {
        Self { db, files, strategy, queues: ImportQueues::new() }
    }

    /// An importer for beatmap set archives with the given decoder.
    pub fn beatmaps(db: Database, files: FileStore, decoder: Arc<dyn BeatmapDecoder>) -> Self {
        Self::new(db, files, Arc::new(BeatmapStrategy::new(decoder)))
    }

    fn check(&self, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(())
    }

    /// Import one archive, returning a live handle to the persisted set.
    ///
    /// `Ok(None)` means the archive produced no model (nothing importable
    /// or unreadable container); the failure is logged, not raised. Any
    /// failure after the write transaction has started is logged with a
    /// short fingerprint tag, rolled back, and re-raised.
    pub async fn import(
        &self,
        archive: &dyn ArchiveReader,
        priority: Priority,
        token: &CancellationToken,
    ) -> Result<Option<Live<BeatmapSet>>> {
        let _slot = self.queues.acquire(priority).await;
        self.check(token)?;

        // Stage 1: skeletal model.
        let mut set = match self.strategy.create_model(archive).await {
            Ok(set) => set,
            Err(e) => {
                warn!(archive = archive.name(), error = ?e, "no model could be created; skipping import");
                return Ok(None);
            },
        };

        // Stage 2: fast fingerprint over the raw archive.
        let entries: Vec<ArchiveEntry> = {
            let filenames = archive.filenames();
            let shortened = shorten_filenames(&filenames);
            filenames
                .into_iter()
                .zip(shortened)
                .map(|(source, shortened)| ArchiveEntry { source, shortened })
                .collect()
        };
        set.hash = self.strategy.compute_hash(archive, &entries).await?;

        // Stage 3: early skip.
        if let Some(live) = self.try_skip(&set, &entries).await? {
            return Ok(Some(live));
        }
        self.check(token)?;

        // Stages 4..6 run inside one write transaction.
        let mut session = self.db.write_session().await.or_raise(|| ErrorKind::Database)?;
        let mut tx = session.begin_write().await.or_raise(|| ErrorKind::Database)?;
        let outcome = match self.run_import(&mut tx, archive, &mut set, &entries, token).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let tag = set.hash.get(..5).unwrap_or(set.hash.as_str());
                error!(tag, error = ?e, "import failed; rolling back");
                drop(tx);
                return Err(e);
            },
        };
        match outcome {
            Outcome::Reuse(existing) => {
                tx.rollback().await.or_raise(|| ErrorKind::Rollback)?;
                debug!(set = %existing.id, "reusing existing beatmap set");
                Ok(Some(self.resurrect(existing).await?))
            },
            Outcome::Fresh => {
                tx.commit().await.or_raise(|| ErrorKind::Database)?;
                debug!(set = %set.id, hash = %set.hash, "import committed");
                Ok(Some(session.live(set)))
            },
        }
    }

    /// Import an already-constructed model, skipping the archive stages.
    ///
    /// File records referenced by `usages` must already exist (added
    /// through the [`FileStore`]). Runs sanitation, collision resolution
    /// and pre-import exactly like the archive path.
    pub async fn import_model(
        &self,
        mut set: BeatmapSet,
        mut beatmaps: Vec<Beatmap>,
        usages: Vec<NamedFileUsage>,
        priority: Priority,
        token: &CancellationToken,
    ) -> Result<Live<BeatmapSet>> {
        let _slot = self.queues.acquire(priority).await;
        self.check(token)?;

        let mut session = self.db.write_session().await.or_raise(|| ErrorKind::Database)?;
        let mut tx = session.begin_write().await.or_raise(|| ErrorKind::Database)?;
        self.sanitise_online_ids(&mut tx, &mut set, &mut beatmaps).await?;
        if let Some(existing) = self.resolve_collision(&mut tx, &set, &usages).await? {
            tx.rollback().await.or_raise(|| ErrorKind::Rollback)?;
            return self.resurrect(existing).await;
        }
        self.strategy.pre_import(&mut set, &mut tx).await?;
        self.persist(&mut tx, &set, &usages, &mut beatmaps).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(session.live(set))
    }

    /// Stages 4 and 5 plus the inserts of stage 6; the caller commits or
    /// rolls back based on the outcome.
    async fn run_import(
        &self,
        tx: &mut WriteTransaction<'_>,
        archive: &dyn ArchiveReader,
        set: &mut BeatmapSet,
        entries: &[ArchiveEntry],
        token: &CancellationToken,
    ) -> Result<Outcome> {
        // 4a: every entry through the file store.
        let mut usages = Vec::with_capacity(entries.len());
        for entry in entries {
            self.check(token)?;
            let data = archive.read(&entry.source).await.or_raise(|| ErrorKind::Storage)?;
            let file = self.files.add(&mut *tx, &data).await.or_raise(|| ErrorKind::Files)?;
            usages.push(NamedFileUsage::new(file.hash, entry.shortened.clone()));
        }

        // 4b: recompute the fingerprint from the committed file records.
        set.hash = self.fingerprint_from_store(&usages, archive.name()).await?;

        // 4c: strategy-specific population.
        self.check(token)?;
        let mut beatmaps =
            self.strategy.populate(set, &usages, &self.files, &mut *tx, token).await?;

        // 4d: online-id sanitation.
        self.sanitise_online_ids(tx, set, &mut beatmaps).await?;

        // 5: collision resolution against the revised fingerprint.
        if let Some(existing) = self.resolve_collision(tx, set, &usages).await? {
            return Ok(Outcome::Reuse(existing));
        }
        self.strategy.pre_import(set, &mut *tx).await?;

        // 6: insert everything; the caller commits.
        self.check(token)?;
        self.persist(tx, set, &usages, &mut beatmaps).await?;
        Ok(Outcome::Fresh)
    }

    async fn persist(
        &self,
        tx: &mut WriteTransaction<'_>,
        set: &BeatmapSet,
        usages: &[NamedFileUsage],
        beatmaps: &mut [Beatmap],
    ) -> Result<()> {
        tx.add(set, false).await.or_raise(|| ErrorKind::Database)?;
        for usage in usages {
            tx.append_usage(&set.id, usage).await.or_raise(|| ErrorKind::Database)?;
        }
        for beatmap in beatmaps.iter_mut() {
            beatmap.set_id = set.id;
            tx.add(&*beatmap, false).await.or_raise(|| ErrorKind::Database)?;
        }
        tx.notify(StoreEvent::BeatmapSetAdded(set.id));
        Ok(())
    }

    /// Stage 3: an existing hash-identical set with matching filenames may
    /// stand in for the archive entirely.
    async fn try_skip(
        &self,
        set: &BeatmapSet,
        entries: &[ArchiveEntry],
    ) -> Result<Option<Live<BeatmapSet>>> {
        let mut session = self.db.read_session().await.or_raise(|| ErrorKind::Database)?;
        let Some(existing) =
            session.set_by_hash(&set.hash).await.or_raise(|| ErrorKind::Database)?
        else {
            return Ok(None);
        };
        let existing_beatmaps =
            session.beatmaps_in_set(&existing.id).await.or_raise(|| ErrorKind::Database)?;
        if !self.strategy.can_skip_import(&existing_beatmaps) {
            return Ok(None);
        }
        let mut archive_names: Vec<&str> = entries.iter().map(|e| e.shortened.as_str()).collect();
        archive_names.sort_unstable();
        let mut existing_names: Vec<String> = session
            .usages_in_set(&existing.id)
            .await
            .or_raise(|| ErrorKind::Database)?
            .into_iter()
            .map(|u| u.filename)
            .collect();
        existing_names.sort_unstable();
        if !existing_names.iter().map(String::as_str).eq(archive_names.iter().copied()) {
            return Ok(None);
        }
        drop(session);
        debug!(set = %existing.id, "found existing set with matching fingerprint; skipping import");
        Ok(Some(self.resurrect(existing).await?))
    }

    /// Stage 5: look up a set with the same revised fingerprint. A
    /// compatible one is returned for re-use; an incompatible one is
    /// flagged for deletion.
    async fn resolve_collision(
        &self,
        tx: &mut WriteTransaction<'_>,
        set: &BeatmapSet,
        usages: &[NamedFileUsage],
    ) -> Result<Option<BeatmapSet>> {
        let Some(mut existing) =
            tx.set_by_hash(&set.hash).await.or_raise(|| ErrorKind::Database)?
        else {
            return Ok(None);
        };
        let extensions = self.strategy.hashable_extensions();
        let existing_usages =
            tx.usages_in_set(&existing.id).await.or_raise(|| ErrorKind::Database)?;
        let reusable = self.strategy.can_reuse_existing(
            &SetContents::from_usages(&existing_usages, extensions),
            &SetContents::from_usages(usages, extensions),
        );
        if reusable {
            return Ok(Some(existing));
        }
        debug!(existing = %existing.id, "fingerprint collision with incompatible set; flagging for deletion");
        existing.delete_pending = true;
        tx.add(&existing, true).await.or_raise(|| ErrorKind::Database)?;
        tx.notify(StoreEvent::BeatmapSetUpdated(existing.id));
        Ok(None)
    }

    /// Clear the existing set's soft-delete flag (in its own short write)
    /// and pin a live handle to it.
    async fn resurrect(&self, mut existing: BeatmapSet) -> Result<Live<BeatmapSet>> {
        let mut session = self.db.write_session().await.or_raise(|| ErrorKind::Database)?;
        if existing.delete_pending {
            existing.delete_pending = false;
            let mut tx = session.begin_write().await.or_raise(|| ErrorKind::Database)?;
            tx.add(&existing, true).await.or_raise(|| ErrorKind::Database)?;
            tx.notify(StoreEvent::BeatmapSetUpdated(existing.id));
            tx.commit().await.or_raise(|| ErrorKind::Database)?;
        }
        Ok(session.live(existing))
    }

    /// The archive fingerprint rule applied to stored blobs: hashable
    /// usages in lexicographic filename order, concatenated and hashed;
    /// with none, the fallback display name is hashed instead.
    async fn fingerprint_from_store(
        &self,
        usages: &[NamedFileUsage],
        fallback_name: &str,
    ) -> Result<String> {
        let extensions = self.strategy.hashable_extensions();
        let mut hashable: Vec<&NamedFileUsage> =
            usages.iter().filter(|u| is_hashable(&u.filename, extensions)).collect();
        hashable.sort_by(|a, b| a.filename.cmp(&b.filename));
        if hashable.is_empty() {
            return Ok(hash_of(fallback_name.as_bytes()));
        }
        let mut hasher = Sha256::new();
        for usage in hashable {
            let data = self
                .files
                .read(&File::new(usage.file_hash.clone()))
                .await
                .or_raise(|| ErrorKind::Files)?;
            hasher.update(&data);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Stage 4d: keep beatmap online ids unique or drop them entirely.
    ///
    /// Duplicates within the set, or a conflict with a database beatmap
    /// outside the candidate re-use set (the existing set carrying this
    /// set's online id), clear every beatmap online id, and the set's
    /// own, since a set whose beatmaps all lost their identity cannot
    /// claim one either.
    async fn sanitise_online_ids(
        &self,
        session: &mut Session,
        set: &mut BeatmapSet,
        beatmaps: &mut [Beatmap],
    ) -> Result<()> {
        let ids: Vec<i64> = beatmaps.iter().filter_map(|b| b.online_id).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let mut unique = HashSet::new();
        let mut clear = ids.iter().any(|id| !unique.insert(*id));
        if !clear {
            let candidate = match set.online_id {
                Some(online_id) => {
                    session.set_by_online_id(online_id).await.or_raise(|| ErrorKind::Database)?
                },
                None => None,
            };
            for id in &ids {
                if let Some(existing) =
                    session.beatmap_by_online_id(*id).await.or_raise(|| ErrorKind::Database)?
                {
                    let within_candidate =
                        candidate.as_ref().is_some_and(|c| c.id == existing.set_id);
                    if !within_candidate {
                        clear = true;
                        break;
                    }
                }
            }
        }
        if clear {
            debug!(set = %set.id, "conflicting beatmap online ids; clearing them");
            for beatmap in beatmaps.iter_mut() {
                beatmap.online_id = None;
            }
            set.online_id = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hashable_matches_extension_case_insensitively() {
        let extensions = &[".osu"];
        assert!(is_hashable("map.osu", extensions));
        assert!(is_hashable("folder/MAP.OSU", extensions));
        assert!(!is_hashable("map.osu.bak", extensions));
        assert!(!is_hashable("audio.mp3", extensions));
    }
}
