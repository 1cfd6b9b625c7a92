//! File records and their named usages.

use crate::error::{ErrorKind, Result};
use crate::models::Record;
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqliteConnection;
use std::path::PathBuf;
use uuid::Uuid;

/// Index entry for one unique byte-content blob.
///
/// The primary key is the lowercase hex SHA-256 of the blob's content, and
/// the on-disk location follows deterministically from it; a `File` record
/// should exist exactly when the blob does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub hash: String,
}

impl File {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// Whether `hash` has the shape of a record key: 64 lowercase hex
    /// characters.
    pub fn is_valid_hash(hash: &str) -> bool {
        hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    }

    /// Relative blob location: `hash[0] / hash[0..2] / hash`.
    ///
    /// Fails with [`InvalidData`](ErrorKind::InvalidData) when the hash is
    /// not a well-formed key (an empty or corrupted hash must not derive a
    /// path).
    pub fn storage_path(&self) -> Result<PathBuf> {
        if !Self::is_valid_hash(&self.hash) {
            exn::bail!(ErrorKind::InvalidData("file hash"));
        }
        Ok(PathBuf::from(&self.hash[0..1]).join(&self.hash[0..2]).join(&self.hash))
    }
}

#[async_trait]
impl Record for File {
    type Key = String;

    fn primary_key(&self) -> String {
        self.hash.clone()
    }

    async fn fetch_all(conn: &mut SqliteConnection) -> Result<Vec<Self>> {
        let hashes: Vec<String> = sqlx::query_scalar("SELECT hash FROM files ORDER BY hash")
            .fetch_all(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(hashes.into_iter().map(File::new).collect())
    }

    async fn fetch(conn: &mut SqliteConnection, key: &String) -> Result<Option<Self>> {
        let hash: Option<String> = sqlx::query_scalar("SELECT hash FROM files WHERE hash = ?")
            .bind(key)
            .fetch_optional(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(hash.map(File::new))
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("INSERT INTO files (hash) VALUES (?)")
            .bind(&self.hash)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn upsert(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("INSERT INTO files (hash) VALUES (?) ON CONFLICT (hash) DO NOTHING")
            .bind(&self.hash)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn delete(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE hash = ?")
            .bind(&self.hash)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

impl File {
    /// Files whose backlink count has reached zero, i.e. garbage.
    pub(crate) async fn fetch_without_usages(conn: &mut SqliteConnection) -> Result<Vec<File>> {
        let hashes: Vec<String> = sqlx::query_scalar(
            "SELECT f.hash FROM files f \
             LEFT JOIN named_file_usages u ON u.file_hash = f.hash \
             WHERE u.file_hash IS NULL ORDER BY f.hash",
        )
        .fetch_all(conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
        Ok(hashes.into_iter().map(File::new).collect())
    }
}

/// The embedding of a [`File`] in a beatmap set under a relative filename.
///
/// Owned by exactly one parent set; has no primary key of its own. The
/// number of usages pointing at a file is its backlink count, which drives
/// garbage collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFileUsage {
    pub file_hash: String,
    pub filename: String,
}

impl NamedFileUsage {
    pub fn new(file_hash: impl Into<String>, filename: impl Into<String>) -> Self {
        Self { file_hash: file_hash.into(), filename: filename.into() }
    }

    pub(crate) async fn insert_for(
        conn: &mut SqliteConnection,
        set_id: &Uuid,
        usage: &NamedFileUsage,
    ) -> Result<()> {
        sqlx::query("INSERT INTO named_file_usages (set_id, filename, file_hash) VALUES (?, ?, ?)")
            .bind(set_id.to_string())
            .bind(&usage.filename)
            .bind(&usage.file_hash)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub(crate) async fn fetch_in_set(
        conn: &mut SqliteConnection,
        set_id: &Uuid,
    ) -> Result<Vec<NamedFileUsage>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT file_hash, filename FROM named_file_usages WHERE set_id = ? ORDER BY rowid",
        )
        .bind(set_id.to_string())
        .fetch_all(conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(|(hash, name)| NamedFileUsage::new(hash, name)).collect())
    }

    pub(crate) async fn count_for(conn: &mut SqliteConnection, file_hash: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT count(*) FROM named_file_usages WHERE file_hash = ?")
            .bind(file_hash)
            .fetch_one(conn)
            .await
            .or_raise(|| ErrorKind::Database)
    }
}
