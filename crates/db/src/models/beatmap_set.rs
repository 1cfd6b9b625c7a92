//! Beatmap set records.

use crate::error::{ErrorKind, Result};
use crate::models::Record;
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqliteConnection;
use time::UtcDateTime;
use uuid::Uuid;

/// A group of playable difficulties packaged and identified together.
///
/// Owns its beatmaps and file usages exclusively (removal cascades to
/// both). Deletion is two-phase: `delete_pending` is flipped inside a write
/// transaction, and the row only disappears during a later purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeatmapSet {
    pub id: Uuid,
    pub online_id: Option<i64>,
    pub date_added: UtcDateTime,
    /// Aggregate fingerprint over the set's hashable files.
    pub hash: String,
    pub delete_pending: bool,
    pub protected: bool,
}

impl BeatmapSet {
    /// A fresh, unpersisted set stamped with the current time.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            online_id: None,
            date_added: UtcDateTime::now(),
            hash: String::new(),
            delete_pending: false,
            protected: false,
        }
    }
}

impl Default for BeatmapSet {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(sqlx::FromRow)]
struct BeatmapSetRow {
    id: String,
    online_id: Option<i64>,
    date_added: i64,
    hash: String,
    delete_pending: i64,
    protected: i64,
}

impl TryFrom<BeatmapSetRow> for BeatmapSet {
    type Error = crate::error::Error;
    fn try_from(row: BeatmapSetRow) -> Result<Self> {
        Ok(Self {
            id: Uuid::parse_str(&row.id).or_raise(|| ErrorKind::InvalidData("set id"))?,
            online_id: row.online_id,
            date_added: UtcDateTime::from_unix_timestamp(row.date_added)
                .or_raise(|| ErrorKind::InvalidData("date added"))?,
            hash: row.hash,
            delete_pending: row.delete_pending != 0,
            protected: row.protected != 0,
        })
    }
}

macro_rules! bind_set {
    ($query:expr, $set:expr) => {
        $query
            .bind($set.id.to_string())
            .bind($set.online_id)
            .bind($set.date_added.unix_timestamp())
            .bind(&$set.hash)
            .bind($set.delete_pending as i64)
            .bind($set.protected as i64)
    };
}

#[async_trait]
impl Record for BeatmapSet {
    type Key = Uuid;

    fn primary_key(&self) -> Uuid {
        self.id
    }

    async fn fetch_all(conn: &mut SqliteConnection) -> Result<Vec<Self>> {
        let rows: Vec<BeatmapSetRow> =
            sqlx::query_as("SELECT * FROM beatmap_sets ORDER BY rowid")
                .fetch_all(conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(BeatmapSet::try_from).collect()
    }

    async fn fetch(conn: &mut SqliteConnection, key: &Uuid) -> Result<Option<Self>> {
        let row: Option<BeatmapSetRow> =
            sqlx::query_as("SELECT * FROM beatmap_sets WHERE id = ?")
                .bind(key.to_string())
                .fetch_optional(conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
        row.map(BeatmapSet::try_from).transpose()
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<()> {
        bind_set!(sqlx::query(include_str!("../../queries/set_insert.sql")), self)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn upsert(&self, conn: &mut SqliteConnection) -> Result<()> {
        bind_set!(sqlx::query(include_str!("../../queries/set_upsert.sql")), self)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn delete(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DELETE FROM beatmap_sets WHERE id = ?")
            .bind(self.id.to_string())
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

impl BeatmapSet {
    /// Look up a set by its aggregate content fingerprint.
    ///
    /// Soft-deleted sets are included on purpose: a re-import of a pending
    /// set resurrects it instead of duplicating it.
    pub(crate) async fn fetch_by_hash(
        conn: &mut SqliteConnection,
        hash: &str,
    ) -> Result<Option<BeatmapSet>> {
        let row: Option<BeatmapSetRow> =
            sqlx::query_as("SELECT * FROM beatmap_sets WHERE hash = ? ORDER BY rowid LIMIT 1")
                .bind(hash)
                .fetch_optional(conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
        row.map(BeatmapSet::try_from).transpose()
    }

    pub(crate) async fn fetch_by_online_id(
        conn: &mut SqliteConnection,
        online_id: i64,
    ) -> Result<Option<BeatmapSet>> {
        let row: Option<BeatmapSetRow> =
            sqlx::query_as("SELECT * FROM beatmap_sets WHERE online_id = ?")
                .bind(online_id)
                .fetch_optional(conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
        row.map(BeatmapSet::try_from).transpose()
    }

    /// Sets flagged for deletion, oldest first.
    pub(crate) async fn fetch_pending_deletion(
        conn: &mut SqliteConnection,
    ) -> Result<Vec<BeatmapSet>> {
        let rows: Vec<BeatmapSetRow> = sqlx::query_as(
            "SELECT * FROM beatmap_sets WHERE delete_pending != 0 AND protected = 0 ORDER BY rowid",
        )
        .fetch_all(conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(BeatmapSet::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_to_model() {
        let added = UtcDateTime::now();
        let set = BeatmapSet::new();
        let row = BeatmapSetRow {
            id: set.id.to_string(),
            online_id: Some(5001),
            date_added: added.unix_timestamp(),
            hash: "ab".repeat(32),
            delete_pending: 1,
            protected: 0,
        };
        let model = BeatmapSet::try_from(row).unwrap();
        assert_eq!(model.id, set.id);
        assert_eq!(model.online_id, Some(5001));
        assert!(model.delete_pending);
        assert!(!model.protected);
        // Unix timestamps carry whole seconds only.
        assert_eq!(model.date_added, added.replace_nanosecond(0).unwrap());
    }

    #[test]
    fn test_new_sets_are_distinct() {
        assert_ne!(BeatmapSet::new().id, BeatmapSet::new().id);
    }
}
