//! Beatmap records.

use crate::error::{ErrorKind, Result};
use crate::models::{BeatmapDifficulty, BeatmapMetadata, Record};
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqliteConnection;
use uuid::Uuid;

/// One playable difficulty within a beatmap set.
///
/// The primary key is a client-generated GUID; `online_id` is the optional
/// server-side identity and is unique across all beatmaps when present.
/// `hash` is the SHA-256 of the decoded text file; `md5_hash` is the legacy
/// digest older servers key on.
#[derive(Debug, Clone, PartialEq)]
pub struct Beatmap {
    pub id: Uuid,
    /// Owning set; the other half of the set's `beatmaps` list.
    pub set_id: Uuid,
    pub ruleset_id: i32,
    pub online_id: Option<i64>,
    pub difficulty_name: String,
    pub hash: String,
    pub md5_hash: String,
    // editor state
    pub distance_spacing: f64,
    pub beat_divisor: i32,
    pub grid_size: i32,
    pub timeline_zoom: f64,
    pub metadata: BeatmapMetadata,
    pub difficulty: BeatmapDifficulty,
}

#[derive(sqlx::FromRow)]
struct BeatmapRow {
    id: String,
    set_id: String,
    ruleset_id: i64,
    online_id: Option<i64>,
    difficulty_name: String,
    hash: String,
    md5_hash: String,
    distance_spacing: f64,
    beat_divisor: i64,
    grid_size: i64,
    timeline_zoom: f64,
    title: String,
    title_romanised: Option<String>,
    artist: String,
    artist_romanised: Option<String>,
    author: String,
    source: String,
    tags: String,
    preview_time: i64,
    audio_file: String,
    background_file: String,
    drain_rate: f64,
    circle_size: f64,
    overall_difficulty: f64,
    approach_rate: f64,
    slider_multiplier: f64,
    slider_tick_rate: f64,
}

impl TryFrom<BeatmapRow> for Beatmap {
    type Error = crate::error::Error;
    fn try_from(row: BeatmapRow) -> Result<Self> {
        Ok(Self {
            id: Uuid::parse_str(&row.id).or_raise(|| ErrorKind::InvalidData("beatmap id"))?,
            set_id: Uuid::parse_str(&row.set_id).or_raise(|| ErrorKind::InvalidData("set id"))?,
            ruleset_id: i32::try_from(row.ruleset_id)
                .or_raise(|| ErrorKind::InvalidData("ruleset id"))?,
            online_id: row.online_id,
            difficulty_name: row.difficulty_name,
            hash: row.hash,
            md5_hash: row.md5_hash,
            distance_spacing: row.distance_spacing,
            beat_divisor: i32::try_from(row.beat_divisor)
                .or_raise(|| ErrorKind::InvalidData("beat divisor"))?,
            grid_size: i32::try_from(row.grid_size)
                .or_raise(|| ErrorKind::InvalidData("grid size"))?,
            timeline_zoom: row.timeline_zoom,
            metadata: BeatmapMetadata {
                title: row.title,
                title_romanised: row.title_romanised,
                artist: row.artist,
                artist_romanised: row.artist_romanised,
                author: row.author,
                source: row.source,
                tags: row.tags,
                preview_time: i32::try_from(row.preview_time)
                    .or_raise(|| ErrorKind::InvalidData("preview time"))?,
                audio_file: row.audio_file,
                background_file: row.background_file,
            },
            difficulty: BeatmapDifficulty {
                drain_rate: row.drain_rate as f32,
                circle_size: row.circle_size as f32,
                overall_difficulty: row.overall_difficulty as f32,
                approach_rate: row.approach_rate as f32,
                slider_multiplier: row.slider_multiplier,
                slider_tick_rate: row.slider_tick_rate,
            },
        })
    }
}

/// Binds every beatmap column in table order onto `query`.
macro_rules! bind_beatmap {
    ($query:expr, $beatmap:expr) => {
        $query
            .bind($beatmap.id.to_string())
            .bind($beatmap.set_id.to_string())
            .bind($beatmap.ruleset_id)
            .bind($beatmap.online_id)
            .bind(&$beatmap.difficulty_name)
            .bind(&$beatmap.hash)
            .bind(&$beatmap.md5_hash)
            .bind($beatmap.distance_spacing)
            .bind($beatmap.beat_divisor)
            .bind($beatmap.grid_size)
            .bind($beatmap.timeline_zoom)
            .bind(&$beatmap.metadata.title)
            .bind(&$beatmap.metadata.title_romanised)
            .bind(&$beatmap.metadata.artist)
            .bind(&$beatmap.metadata.artist_romanised)
            .bind(&$beatmap.metadata.author)
            .bind(&$beatmap.metadata.source)
            .bind(&$beatmap.metadata.tags)
            .bind($beatmap.metadata.preview_time)
            .bind(&$beatmap.metadata.audio_file)
            .bind(&$beatmap.metadata.background_file)
            .bind($beatmap.difficulty.drain_rate as f64)
            .bind($beatmap.difficulty.circle_size as f64)
            .bind($beatmap.difficulty.overall_difficulty as f64)
            .bind($beatmap.difficulty.approach_rate as f64)
            .bind($beatmap.difficulty.slider_multiplier)
            .bind($beatmap.difficulty.slider_tick_rate)
    };
}

#[async_trait]
impl Record for Beatmap {
    type Key = Uuid;

    fn primary_key(&self) -> Uuid {
        self.id
    }

    async fn fetch_all(conn: &mut SqliteConnection) -> Result<Vec<Self>> {
        let rows: Vec<BeatmapRow> = sqlx::query_as("SELECT * FROM beatmaps ORDER BY rowid")
            .fetch_all(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Beatmap::try_from).collect()
    }

    async fn fetch(conn: &mut SqliteConnection, key: &Uuid) -> Result<Option<Self>> {
        let row: Option<BeatmapRow> = sqlx::query_as("SELECT * FROM beatmaps WHERE id = ?")
            .bind(key.to_string())
            .fetch_optional(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Beatmap::try_from).transpose()
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<()> {
        bind_beatmap!(sqlx::query(include_str!("../../queries/beatmap_insert.sql")), self)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn upsert(&self, conn: &mut SqliteConnection) -> Result<()> {
        bind_beatmap!(sqlx::query(include_str!("../../queries/beatmap_upsert.sql")), self)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn delete(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DELETE FROM beatmaps WHERE id = ?")
            .bind(self.id.to_string())
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

impl Beatmap {
    /// All beatmaps belonging to `set_id`, in insertion order.
    pub(crate) async fn fetch_in_set(
        conn: &mut SqliteConnection,
        set_id: &Uuid,
    ) -> Result<Vec<Beatmap>> {
        let rows: Vec<BeatmapRow> =
            sqlx::query_as("SELECT * FROM beatmaps WHERE set_id = ? ORDER BY rowid")
                .bind(set_id.to_string())
                .fetch_all(conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Beatmap::try_from).collect()
    }

    /// Look up a beatmap by its server-side identity.
    pub(crate) async fn fetch_by_online_id(
        conn: &mut SqliteConnection,
        online_id: i64,
    ) -> Result<Option<Beatmap>> {
        let row: Option<BeatmapRow> =
            sqlx::query_as("SELECT * FROM beatmaps WHERE online_id = ?")
                .bind(online_id)
                .fetch_optional(conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
        row.map(Beatmap::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_to_model() {
        let id = Uuid::new_v4();
        let set_id = Uuid::new_v4();
        let row = BeatmapRow {
            id: id.to_string(),
            set_id: set_id.to_string(),
            ruleset_id: 0,
            online_id: Some(4242),
            difficulty_name: "Insane".to_string(),
            hash: "69".repeat(32),
            md5_hash: "ab".repeat(16),
            distance_spacing: 1.2,
            beat_divisor: 4,
            grid_size: 8,
            timeline_zoom: 2.0,
            title: "Song".to_string(),
            title_romanised: None,
            artist: "アーティスト".to_string(),
            artist_romanised: Some("Artist".to_string()),
            author: "mapper".to_string(),
            source: String::new(),
            tags: "tag1 tag2".to_string(),
            preview_time: -1,
            audio_file: "audio.mp3".to_string(),
            background_file: "bg.png".to_string(),
            drain_rate: 6.0,
            circle_size: 4.0,
            overall_difficulty: 8.5,
            approach_rate: 9.0,
            slider_multiplier: 1.8,
            slider_tick_rate: 2.0,
        };
        let beatmap = Beatmap::try_from(row).unwrap();
        assert_eq!(beatmap.id, id);
        assert_eq!(beatmap.set_id, set_id);
        assert_eq!(beatmap.online_id, Some(4242));
        assert_eq!(beatmap.metadata.artist_romanised.as_deref(), Some("Artist"));
        assert_eq!(beatmap.metadata.preview_time, -1);
        assert_eq!(beatmap.difficulty.overall_difficulty, 8.5);
        assert_eq!(beatmap.difficulty.slider_multiplier, 1.8);
    }

    #[test]
    fn test_row_with_bad_id_fails() {
        let row = BeatmapRow {
            id: "not-a-uuid".to_string(),
            set_id: Uuid::new_v4().to_string(),
            ruleset_id: 0,
            online_id: None,
            difficulty_name: String::new(),
            hash: String::new(),
            md5_hash: String::new(),
            distance_spacing: 0.0,
            beat_divisor: 4,
            grid_size: 4,
            timeline_zoom: 1.0,
            title: String::new(),
            title_romanised: None,
            artist: String::new(),
            artist_romanised: None,
            author: String::new(),
            source: String::new(),
            tags: String::new(),
            preview_time: 0,
            audio_file: String::new(),
            background_file: String::new(),
            drain_rate: 5.0,
            circle_size: 5.0,
            overall_difficulty: 5.0,
            approach_rate: 5.0,
            slider_multiplier: 1.4,
            slider_tick_rate: 1.0,
        };
        let err = Beatmap::try_from(row).unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::InvalidData("beatmap id")));
    }
}
