//! End-to-end import scenarios over a real database file and an in-memory
//! blob backend.

use mapstash_db::{Beatmap, BeatmapSet, Database, File, NamedFileUsage, Ruleset};
use mapstash_library::archive::MemoryArchive;
use mapstash_library::decode::LineDecoder;
use mapstash_library::files::FileStore;
use mapstash_library::import::{Importer, Priority};
use mapstash_library::maintenance;
use mapstash_storage::BlobBackend;
use mapstash_storage::backend::MemoryBackend;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const KNOWN_RULESET: i32 = 0;
const UNAVAILABLE_RULESET: i32 = 50;
const UNKNOWN_RULESET: i32 = 99;

struct Harness {
    _dir: tempfile::TempDir,
    db: Database,
    backend: Arc<MemoryBackend>,
    store: FileStore,
    importer: Importer,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).await.unwrap();

    let mut session = db.write_session().await.unwrap();
    let mut tx = session.begin_write().await.unwrap();
    tx.add(
        &Ruleset {
            online_id: KNOWN_RULESET,
            name: "circles".to_string(),
            short_name: "crc".to_string(),
            instantiation_info: "rulesets.circles".to_string(),
            available: true,
        },
        true,
    )
    .await
    .unwrap();
    // Registered, but its implementation could not be loaded.
    tx.add(
        &Ruleset {
            online_id: UNAVAILABLE_RULESET,
            name: "squares".to_string(),
            short_name: "sqr".to_string(),
            instantiation_info: "rulesets.squares".to_string(),
            available: false,
        },
        true,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    drop(session);

    let backend = Arc::new(MemoryBackend::default());
    let store = FileStore::new(backend.clone());
    let importer = Importer::beatmaps(db.clone(), store.clone(), Arc::new(LineDecoder));
    Harness { _dir: dir, db, backend, store, importer }
}

/// 18 hashable entries inside one folder: twelve resolve to the known
/// ruleset (online ids 101..=112), six reference an unknown one.
fn archive_a() -> MemoryArchive {
    let mut archive = MemoryArchive::new("archive-a.osz");
    for i in 1..=18u32 {
        archive = archive.with_entry(entry_name(i), entry_content(i));
    }
    archive
}

fn entry_name(i: u32) -> String {
    format!("Fixture Set/{i:02}.osu")
}

fn entry_content(i: u32) -> String {
    let ruleset = if i <= 12 { KNOWN_RULESET } else { UNKNOWN_RULESET };
    format!(
        "ruleset: {ruleset}\nonline_id: {}\nset_online_id: 5001\nname: Diff {i}\n\
         title: Fixture Song\nartist: Fixture Artist\nauthor: mapper\n",
        100 + i
    )
}

async fn import(h: &Harness, archive: &MemoryArchive) -> mapstash_db::Live<BeatmapSet> {
    h.importer
        .import(archive, Priority::Normal, &CancellationToken::new())
        .await
        .unwrap()
        .expect("archive should produce a model")
}

async fn set_count(db: &Database) -> usize {
    let mut session = db.read_session().await.unwrap();
    session.all::<BeatmapSet>().await.unwrap().len()
}

async fn beatmap_count(db: &Database) -> usize {
    let mut session = db.read_session().await.unwrap();
    session.all::<Beatmap>().await.unwrap().len()
}

async fn files_with_single_usage(db: &Database) -> usize {
    let mut session = db.read_session().await.unwrap();
    let files = session.all::<File>().await.unwrap();
    let mut count = 0;
    for file in files {
        if session.usage_count(&file.hash).await.unwrap() == 1 {
            count += 1;
        }
    }
    count
}

// S1: construct empty.
#[tokio::test]
async fn construct_empty() {
    let h = harness().await;
    {
        let _update = h.db.update_session().await.unwrap();
    }
    h.db.refresh().await.unwrap();
    assert_eq!(set_count(&h.db).await, 0);
}

// S2: import, count, dedup.
#[tokio::test]
async fn import_counts_and_dedup() {
    let h = harness().await;
    let first = import(&h, &archive_a()).await;
    h.db.refresh().await.unwrap();

    assert_eq!(set_count(&h.db).await, 1);
    assert_eq!(beatmap_count(&h.db).await, 12, "unknown-ruleset entries are skipped");
    assert_eq!(files_with_single_usage(&h.db).await, 18);

    let second = import(&h, &archive_a()).await;
    assert_eq!(first.key(), second.key(), "re-import resolves to the same set");
    assert_eq!(set_count(&h.db).await, 1);
    assert_eq!(files_with_single_usage(&h.db).await, 18);
}

// S3 / S4: cleanup reclaims unreferenced blobs and spares referenced ones.
#[tokio::test]
async fn cleanup_unreferenced_and_referenced() {
    let h = harness().await;
    let mut session = h.db.write_session().await.unwrap();
    let mut tx = session.begin_write().await.unwrap();
    let orphan = h.store.add(&mut tx, &[0, 1, 2, 3]).await.unwrap();
    let kept = h.store.add(&mut tx, &[4, 5, 6, 7]).await.unwrap();
    let set = BeatmapSet::new();
    tx.add(&set, false).await.unwrap();
    tx.append_usage(&set.id, &NamedFileUsage::new(kept.hash.clone(), "kept.bin")).await.unwrap();
    tx.commit().await.unwrap();
    drop(session);

    h.store.cleanup(&h.db).await.unwrap();

    let mut reader = h.db.read_session().await.unwrap();
    assert!(reader.find::<File>(&orphan.hash).await.unwrap().is_none());
    assert!(!h.backend.exists(&orphan.storage_path().unwrap()).await.unwrap());
    assert!(reader.find::<File>(&kept.hash).await.unwrap().is_some());
    assert!(h.backend.exists(&kept.storage_path().unwrap()).await.unwrap());
    // Invariant: no zero-usage file survives a cleanup.
    assert!(reader.files_without_usages().await.unwrap().is_empty());
}

// S5 first half / property 6: identical content under a different
// container keeps the set's identity.
#[tokio::test]
async fn recompressed_archive_keeps_identity() {
    let h = harness().await;
    let original = import(&h, &archive_a()).await;

    let mut repacked = MemoryArchive::new("archive-a (1).osz");
    for i in 1..=18u32 {
        repacked = repacked.with_entry(entry_name(i), entry_content(i));
    }
    let second = import(&h, &repacked).await;
    assert_eq!(original.key(), second.key());
    assert_eq!(set_count(&h.db).await, 1);
}

// S5 second half / property 7: editing a hashable file breaks identity...
#[tokio::test]
async fn hashable_edit_breaks_identity() {
    let h = harness().await;
    let original = import(&h, &archive_a()).await;

    let mut edited = MemoryArchive::new("archive-a.osz");
    for i in 1..=18u32 {
        let mut content = entry_content(i);
        if i == 1 {
            content.push_str("// changed\n");
        }
        edited = edited.with_entry(entry_name(i), content);
    }
    let second = import(&h, &edited).await;
    assert_ne!(original.key(), second.key());
    assert_eq!(set_count(&h.db).await, 2);
}

// ...while editing only a non-hashable file preserves it.
#[tokio::test]
async fn non_hashable_edit_preserves_identity() {
    let h = harness().await;
    let with_media = |bg: &[u8]| {
        let mut archive = MemoryArchive::new("with-media.osz");
        for i in 1..=4u32 {
            archive = archive.with_entry(entry_name(i), entry_content(i));
        }
        archive.with_entry("Fixture Set/bg.png", bg.to_vec())
    };
    let original = import(&h, &with_media(b"original image")).await;
    let second = import(&h, &with_media(b"touched-up image")).await;
    assert_eq!(original.key(), second.key());
    assert_eq!(set_count(&h.db).await, 1);
}

// Property 8: renaming any entry yields a different set.
#[tokio::test]
async fn renamed_entry_breaks_identity() {
    let h = harness().await;
    let build = |last_name: &str| {
        let mut archive = MemoryArchive::new("renamed.osz");
        for i in 1..=4u32 {
            archive = archive.with_entry(entry_name(i), entry_content(i));
        }
        archive.with_entry(format!("Fixture Set/{last_name}"), b"media bytes".to_vec())
    };
    let original = import(&h, &build("cover.png")).await;
    let second = import(&h, &build("renamed-cover.png")).await;
    assert_ne!(original.key(), second.key());

    // The colliding original was flagged for deletion and purging removes it.
    let mut reader = h.db.read_session().await.unwrap();
    let old = reader.find::<BeatmapSet>(original.key()).await.unwrap().unwrap();
    assert!(old.delete_pending);
    drop(reader);
    assert_eq!(maintenance::purge_pending(&h.db).await.unwrap(), 1);
    assert_eq!(set_count(&h.db).await, 1);
}

// Property 3: parent back-references, and property 1: blob/record
// agreement after commit.
#[tokio::test]
async fn parents_and_blobs_agree_after_import() {
    let h = harness().await;
    let live = import(&h, &archive_a()).await;

    let mut reader = h.db.read_session().await.unwrap();
    let beatmaps = reader.beatmaps_in_set(live.key()).await.unwrap();
    assert_eq!(beatmaps.len(), 12);
    assert!(beatmaps.iter().all(|b| b.set_id == *live.key()));

    for file in reader.all::<File>().await.unwrap() {
        let blob = h.backend.read(&file.storage_path().unwrap()).await.unwrap();
        assert_eq!(mapstash_library::files::hash_of(&blob), file.hash);
    }
}

// Property 4: online-id uniqueness across imports. A variant carrying the
// same set online id takes over the slot; the replaced set is soft-deleted
// and stripped of its ids.
#[tokio::test]
async fn online_id_slot_is_released_to_newcomer() {
    let h = harness().await;
    let original = import(&h, &archive_a()).await;

    // Same online ids, same set online id, different content and names.
    let mut variant = MemoryArchive::new("archive-a-v2.osz");
    for i in 1..=18u32 {
        variant = variant.with_entry(
            format!("Fixture Set v2/{i:02}.osu"),
            format!("{}version: 2\n", entry_content(i)),
        );
    }
    let second = import(&h, &variant).await;
    assert_ne!(original.key(), second.key());

    let mut reader = h.db.read_session().await.unwrap();
    let old = reader.find::<BeatmapSet>(original.key()).await.unwrap().unwrap();
    let new = reader.find::<BeatmapSet>(second.key()).await.unwrap().unwrap();
    assert!(old.delete_pending);
    assert_eq!(old.online_id, None);
    assert_eq!(new.online_id, Some(5001));
    assert!(reader.beatmaps_in_set(&old.id).await.unwrap().iter().all(|b| b.online_id.is_none()));
    let new_ids: Vec<i64> = reader
        .beatmaps_in_set(&new.id)
        .await
        .unwrap()
        .iter()
        .filter_map(|b| b.online_id)
        .collect();
    assert_eq!(new_ids.len(), 12, "the newcomer keeps its beatmap online ids");
}

// Property 4, other direction: conflicting beatmap ids under a *different*
// set online id lose their identity instead.
#[tokio::test]
async fn conflicting_beatmap_ids_are_cleared() {
    let h = harness().await;
    import(&h, &archive_a()).await;

    let mut conflicting = MemoryArchive::new("impostor.osz");
    for i in 1..=4u32 {
        conflicting = conflicting.with_entry(
            format!("Impostor/{i:02}.osu"),
            format!(
                "ruleset: {KNOWN_RULESET}\nonline_id: {}\nset_online_id: 7777\nname: Stolen {i}\n",
                100 + i
            ),
        );
    }
    let live = import(&h, &conflicting).await;

    let mut reader = h.db.read_session().await.unwrap();
    let set = reader.find::<BeatmapSet>(live.key()).await.unwrap().unwrap();
    assert_eq!(set.online_id, None, "a set whose beatmaps lost identity cannot claim one");
    assert!(reader.beatmaps_in_set(&set.id).await.unwrap().iter().all(|b| b.online_id.is_none()));
}

// S6: rollback on failure leaves previous state untouched.
#[tokio::test]
async fn failed_import_rolls_back() {
    let h = harness().await;
    let live = import(&h, &archive_a()).await;

    // Mutate the stored hash out-of-band so every collision check misses.
    let mut session = h.db.write_session().await.unwrap();
    let mut tx = session.begin_write().await.unwrap();
    let mut stored = tx.find::<BeatmapSet>(live.key()).await.unwrap().unwrap();
    stored.hash = "0".repeat(64);
    tx.add(&stored, true).await.unwrap();
    tx.commit().await.unwrap();
    drop(session);

    // An archive whose hashable file is empty fails during populate.
    let broken = MemoryArchive::new("broken.osz").with_entry("Broken/empty.osu", Vec::new());
    let result = h.importer.import(&broken, Priority::Normal, &CancellationToken::new()).await;
    assert!(result.is_err());

    assert_eq!(set_count(&h.db).await, 1);
    assert_eq!(beatmap_count(&h.db).await, 12);
    assert_eq!(files_with_single_usage(&h.db).await, 18);
}

// A ruleset that is registered but flagged unavailable is treated like an
// unknown one: its beatmaps are skipped, their files still import.
#[tokio::test]
async fn unavailable_ruleset_is_skipped() {
    let h = harness().await;
    let archive = MemoryArchive::new("mixed-rulesets.osz")
        .with_entry(
            "Mixed/playable.osu",
            format!("ruleset: {KNOWN_RULESET}\nonline_id: 901\nset_online_id: 9001\nname: Playable\n"),
        )
        .with_entry(
            "Mixed/unloadable.osu",
            format!("ruleset: {UNAVAILABLE_RULESET}\nonline_id: 902\nset_online_id: 9001\nname: Unloadable\n"),
        );
    let live = import(&h, &archive).await;

    let mut reader = h.db.read_session().await.unwrap();
    let beatmaps = reader.beatmaps_in_set(live.key()).await.unwrap();
    assert_eq!(beatmaps.len(), 1);
    assert_eq!(beatmaps[0].ruleset_id, KNOWN_RULESET);
    // Both entries still made it into the file store.
    assert_eq!(reader.usages_in_set(live.key()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn archive_without_hashable_entries_produces_no_model() {
    let h = harness().await;
    let media_only = MemoryArchive::new("media.zip")
        .with_entry("a.png", b"image".to_vec())
        .with_entry("b.mp3", b"audio".to_vec());
    let result =
        h.importer.import(&media_only, Priority::Normal, &CancellationToken::new()).await.unwrap();
    assert!(result.is_none());
    assert_eq!(set_count(&h.db).await, 0);
}

#[tokio::test]
async fn cancelled_import_aborts_cleanly() {
    let h = harness().await;
    let token = CancellationToken::new();
    token.cancel();
    let err =
        h.importer.import(&archive_a(), Priority::Normal, &token).await.map(|_| ()).unwrap_err();
    assert!(matches!(err.current_value(), mapstash_library::import::error::ErrorKind::Cancelled));
    assert_eq!(set_count(&h.db).await, 0);
    assert_eq!(files_with_single_usage(&h.db).await, 0);
}

#[tokio::test]
async fn low_priority_queue_imports_too() {
    let h = harness().await;
    let live = h
        .importer
        .import(&archive_a(), Priority::Low, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    let title = live
        .perform_read(|set| {
            assert!(!set.delete_pending);
            set.hash.clone()
        })
        .await
        .unwrap();
    assert_eq!(title.len(), 64);
}
