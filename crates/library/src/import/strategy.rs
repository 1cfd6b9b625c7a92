//! The import strategy interface.
//!
//! The pipeline in [`super`] is the same for every archive kind; what
//! varies (which files fingerprint the archive, how a model is created,
//! how entries decode into records) plugs in through this trait. Beatmap
//! archives are implemented in [`beatmap`](super::beatmap); skins and
//! replays would be further implementations, not subclasses.

use crate::archive::ArchiveReader;
use crate::files::FileStore;
use crate::import::error::{ErrorKind, Result};
use crate::import::{ArchiveEntry, is_hashable};
use async_trait::async_trait;
use exn::ResultExt;
use mapstash_db::{Beatmap, BeatmapSet, NamedFileUsage, Session};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The sorted content signature of a set, used for re-use decisions.
///
/// `filenames` covers every entry; `hashable_hashes` only the entries that
/// participate in the archive fingerprint. A non-hashable edit therefore
/// leaves the signature intact, which is what keeps re-imports of
/// cosmetically-touched archives from duplicating the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetContents {
    pub filenames: Vec<String>,
    pub hashable_hashes: Vec<String>,
}

impl SetContents {
    /// Build a signature from usages, sorting both components.
    pub fn from_usages(usages: &[NamedFileUsage], hashable_extensions: &[&str]) -> Self {
        let mut filenames: Vec<String> = usages.iter().map(|u| u.filename.clone()).collect();
        filenames.sort();
        let mut hashable_hashes: Vec<String> = usages
            .iter()
            .filter(|u| is_hashable(&u.filename, hashable_extensions))
            .map(|u| u.file_hash.clone())
            .collect();
        hashable_hashes.sort();
        Self { filenames, hashable_hashes }
    }
}

/// Hooks that specialize the import pipeline for one archive kind.
#[async_trait]
pub trait ImportStrategy: Send + Sync {
    /// Extensions (lowercase, dot included) whose content participates in
    /// the archive fingerprint.
    fn hashable_extensions(&self) -> &[&str];

    /// Stage 1: inspect the archive and build the skeletal model, or fail
    /// with [`ModelCreationFailed`](ErrorKind::ModelCreationFailed) if the
    /// archive holds nothing importable.
    async fn create_model(&self, archive: &dyn ArchiveReader) -> Result<BeatmapSet>;

    /// Stage 4c: construct the set's child records from its stored files.
    ///
    /// Runs inside the import's write transaction; entries are read back
    /// through the [`FileStore`] rather than the archive. Returns the
    /// beatmaps to be parented to `set`.
    async fn populate(
        &self,
        set: &mut BeatmapSet,
        usages: &[NamedFileUsage],
        files: &FileStore,
        session: &mut Session,
        token: &CancellationToken,
    ) -> Result<Vec<Beatmap>>;

    /// Stage 2: the fast archive fingerprint.
    ///
    /// Default: SHA-256 over the hashable entries' contents concatenated
    /// in lexicographic shortened-name order; with no hashable entries,
    /// SHA-256 of the archive's display name.
    async fn compute_hash(
        &self,
        archive: &dyn ArchiveReader,
        entries: &[ArchiveEntry],
    ) -> Result<String> {
        let mut hashable: Vec<&ArchiveEntry> = entries
            .iter()
            .filter(|e| is_hashable(&e.shortened, self.hashable_extensions()))
            .collect();
        hashable.sort_by(|a, b| a.shortened.cmp(&b.shortened));
        if hashable.is_empty() {
            return Ok(hex::encode(Sha256::digest(archive.name().as_bytes())));
        }
        let mut hasher = Sha256::new();
        for entry in hashable {
            hasher.update(archive.read(&entry.source).await.or_raise(|| ErrorKind::Storage)?);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Stage 3 gate: may a hash-identical existing set stand in for this
    /// archive without touching the database at all?
    ///
    /// Default: only when the existing set has at least one beatmap with
    /// an online id; a set that never resolved online is re-imported so
    /// a later lookup gets another chance.
    fn can_skip_import(&self, existing_beatmaps: &[Beatmap]) -> bool {
        existing_beatmaps.iter().any(|b| b.online_id.is_some())
    }

    /// Stage 5 gate: may an existing set with the same fingerprint be
    /// resurrected instead of persisting the freshly built one?
    ///
    /// Default: identical sorted filenames and identical sorted hashable
    /// file hashes.
    fn can_reuse_existing(&self, existing: &SetContents, candidate: &SetContents) -> bool {
        existing == candidate
    }

    /// Stage 5, pre-insert: release uniqueness slots the new set needs.
    ///
    /// Default: an existing set carrying the same online id is soft-deleted
    /// and stripped of its (and its beatmaps') online ids so the insert
    /// does not collide.
    async fn pre_import(&self, set: &mut BeatmapSet, session: &mut Session) -> Result<()> {
        release_online_id_slot(set, session).await
    }
}

/// Default [`pre_import`](ImportStrategy::pre_import) behavior.
pub(crate) async fn release_online_id_slot(
    set: &mut BeatmapSet,
    session: &mut Session,
) -> Result<()> {
    let Some(online_id) = set.online_id else {
        return Ok(());
    };
    let existing = session.set_by_online_id(online_id).await.or_raise(|| ErrorKind::Database)?;
    let Some(mut existing) = existing.filter(|e| e.id != set.id) else {
        return Ok(());
    };
    debug!(online_id, replaced = %existing.id, "releasing online id held by an existing set");
    for mut beatmap in
        session.beatmaps_in_set(&existing.id).await.or_raise(|| ErrorKind::Database)?
    {
        if beatmap.online_id.is_some() {
            beatmap.online_id = None;
            session.add(&beatmap, true).await.or_raise(|| ErrorKind::Database)?;
        }
    }
    existing.online_id = None;
    existing.delete_pending = true;
    session.add(&existing, true).await.or_raise(|| ErrorKind::Database)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(hash: &str, name: &str) -> NamedFileUsage {
        NamedFileUsage::new(hash, name)
    }

    #[test]
    fn test_set_contents_sorts_and_filters() {
        let contents = SetContents::from_usages(
            &[usage("bb", "z.osu"), usage("aa", "a.osu"), usage("cc", "bg.png")],
            &[".osu"],
        );
        assert_eq!(contents.filenames, vec!["a.osu", "bg.png", "z.osu"]);
        assert_eq!(contents.hashable_hashes, vec!["aa", "bb"]);
    }

    #[test]
    fn test_set_contents_ignores_non_hashable_content_changes() {
        // Same names, different hash for the non-hashable entry: the
        // signatures still compare equal.
        let before = SetContents::from_usages(
            &[usage("aa", "a.osu"), usage("11", "bg.png")],
            &[".osu"],
        );
        let after = SetContents::from_usages(
            &[usage("aa", "a.osu"), usage("22", "bg.png")],
            &[".osu"],
        );
        assert_eq!(before, after);
    }

    #[test]
    fn test_set_contents_detects_renames_and_hashable_edits() {
        let base =
            SetContents::from_usages(&[usage("aa", "a.osu"), usage("11", "bg.png")], &[".osu"]);
        let renamed =
            SetContents::from_usages(&[usage("aa", "a.osu"), usage("11", "cover.png")], &[".osu"]);
        let edited =
            SetContents::from_usages(&[usage("ff", "a.osu"), usage("11", "bg.png")], &[".osu"]);
        assert_ne!(base, renamed);
        assert_ne!(base, edited);
    }
}
