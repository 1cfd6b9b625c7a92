//! Beatmap archive imports.

use crate::archive::{ArchiveReader, shorten_filenames};
use crate::decode::BeatmapDecoder;
use crate::files::{FileStore, hash_of};
use crate::import::error::{ErrorKind, Result};
use crate::import::is_hashable;
use crate::import::strategy::ImportStrategy;
use async_trait::async_trait;
use exn::ResultExt;
use md5::Md5;
use sha2::Digest;
use std::collections::HashSet;
use std::sync::Arc;
use mapstash_db::{Beatmap, BeatmapSet, File, NamedFileUsage, Session};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Extensions that participate in a beatmap archive's fingerprint.
const HASHABLE_EXTENSIONS: &[&str] = &[".osu"];

/// [`ImportStrategy`] for beatmap set archives.
pub struct BeatmapStrategy {
    decoder: Arc<dyn BeatmapDecoder>,
}

impl BeatmapStrategy {
    pub fn new(decoder: Arc<dyn BeatmapDecoder>) -> Self {
        Self { decoder }
    }
}

#[async_trait]
impl ImportStrategy for BeatmapStrategy {
    fn hashable_extensions(&self) -> &[&str] {
        HASHABLE_EXTENSIONS
    }

    /// An archive qualifies if it contains at least one `.osu` entry; a
    /// single representative entry supplies the set's online id. A
    /// representative that fails to decode is tolerated here (the id stays
    /// unset); populate will surface the failure with rollback semantics
    /// instead of silently discarding the archive.
    async fn create_model(&self, archive: &dyn ArchiveReader) -> Result<BeatmapSet> {
        let filenames = archive.filenames();
        let shortened = shorten_filenames(&filenames);
        let Some(index) =
            shortened.iter().position(|name| is_hashable(name, self.hashable_extensions()))
        else {
            exn::bail!(ErrorKind::ModelCreationFailed);
        };
        let representative =
            archive.read(&filenames[index]).await.or_raise(|| ErrorKind::ModelCreationFailed)?;

        let mut set = BeatmapSet::new();
        match self.decoder.decode(&representative) {
            Ok(decoded) => set.online_id = decoded.set_online_id,
            Err(e) => {
                debug!(archive = archive.name(), error = ?e, "representative entry did not decode");
            },
        }
        Ok(set)
    }

    async fn populate(
        &self,
        set: &mut BeatmapSet,
        usages: &[NamedFileUsage],
        files: &FileStore,
        session: &mut Session,
        token: &CancellationToken,
    ) -> Result<Vec<Beatmap>> {
        let mut beatmaps = Vec::new();
        let mut seen_hashes = HashSet::new();
        for usage in
            usages.iter().filter(|u| is_hashable(&u.filename, self.hashable_extensions()))
        {
            if token.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            // The in-archive bytes have been consumed by this point; read
            // the committed blob back through the file store.
            let data = files
                .read(&File::new(usage.file_hash.clone()))
                .await
                .or_raise(|| ErrorKind::Files)?;
            let decoded =
                self.decoder.decode(&data).or_raise(|| ErrorKind::PopulateFailed)?;

            let hash = hash_of(&data);
            if !seen_hashes.insert(hash.clone()) {
                debug!(file = %usage.filename, "collapsing duplicate-hash beatmap");
                continue;
            }
            // An unavailable ruleset is as unplayable as an unknown one;
            // the file itself still imports either way.
            if session
                .available_ruleset(decoded.ruleset_id)
                .await
                .or_raise(|| ErrorKind::Database)?
                .is_none()
            {
                debug!(
                    ruleset = decoded.ruleset_id,
                    file = %usage.filename,
                    "skipping beatmap with unknown or unavailable ruleset"
                );
                continue;
            }

            beatmaps.push(Beatmap {
                id: Uuid::new_v4(),
                set_id: set.id,
                ruleset_id: decoded.ruleset_id,
                online_id: decoded.online_id,
                difficulty_name: decoded.difficulty_name,
                md5_hash: hex::encode(Md5::digest(&data)),
                hash,
                distance_spacing: decoded.distance_spacing,
                beat_divisor: decoded.beat_divisor,
                grid_size: decoded.grid_size,
                timeline_zoom: decoded.timeline_zoom,
                metadata: decoded.metadata,
                difficulty: decoded.difficulty,
            });
        }
        Ok(beatmaps)
    }
}
