//! Ruleset records.

use crate::error::{ErrorKind, Result};
use crate::models::Record;
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqliteConnection;

/// A registered gameplay ruleset, keyed by its online id.
///
/// Beatmaps reference rulesets by this id; the importer skips beatmaps whose
/// ruleset is unknown to the database or flagged unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
    pub online_id: i32,
    pub name: String,
    pub short_name: String,
    /// Hint used by the host to instantiate the ruleset implementation.
    pub instantiation_info: String,
    pub available: bool,
}

#[derive(sqlx::FromRow)]
struct RulesetRow {
    online_id: i64,
    name: String,
    short_name: String,
    instantiation_info: String,
    available: i64,
}

impl TryFrom<RulesetRow> for Ruleset {
    type Error = crate::error::Error;
    fn try_from(row: RulesetRow) -> Result<Self> {
        Ok(Self {
            online_id: i32::try_from(row.online_id).or_raise(|| ErrorKind::InvalidData("ruleset id"))?,
            name: row.name,
            short_name: row.short_name,
            instantiation_info: row.instantiation_info,
            available: row.available != 0,
        })
    }
}

#[async_trait]
impl Record for Ruleset {
    type Key = i32;

    fn primary_key(&self) -> i32 {
        self.online_id
    }

    async fn fetch_all(conn: &mut SqliteConnection) -> Result<Vec<Self>> {
        let rows: Vec<RulesetRow> =
            sqlx::query_as("SELECT * FROM rulesets ORDER BY online_id")
                .fetch_all(conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Ruleset::try_from).collect()
    }

    async fn fetch(conn: &mut SqliteConnection, key: &i32) -> Result<Option<Self>> {
        let row: Option<RulesetRow> =
            sqlx::query_as("SELECT * FROM rulesets WHERE online_id = ?")
                .bind(key)
                .fetch_optional(conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
        row.map(Ruleset::try_from).transpose()
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(include_str!("../../queries/ruleset_insert.sql"))
            .bind(self.online_id)
            .bind(&self.name)
            .bind(&self.short_name)
            .bind(&self.instantiation_info)
            .bind(self.available as i64)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn upsert(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(include_str!("../../queries/ruleset_upsert.sql"))
            .bind(self.online_id)
            .bind(&self.name)
            .bind(&self.short_name)
            .bind(&self.instantiation_info)
            .bind(self.available as i64)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn delete(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DELETE FROM rulesets WHERE online_id = ?")
            .bind(self.online_id)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

impl Ruleset {
    /// Look up an *available* ruleset, for import-time resolution.
    pub(crate) async fn fetch_available(
        conn: &mut SqliteConnection,
        online_id: i32,
    ) -> Result<Option<Ruleset>> {
        Ok(Self::fetch(conn, &online_id).await?.filter(|r| r.available))
    }
}
