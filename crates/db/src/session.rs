//! Sessions and write transactions.
//!
//! A [`Session`] is a scoped handle on the embedded database, pinned to a
//! point-in-time snapshot: it observes every commit that happened at or
//! before its most recent [`refresh`](Session::refresh) and nothing after.
//! Mutations happen through a [`WriteTransaction`] obtained from
//! [`begin_write`](Session::begin_write); writers are serialized
//! process-wide by the manager's write permit, readers are never blocked.

use crate::error::{ErrorKind, Result};
use crate::events::StoreEvent;
use crate::live::Live;
use crate::models::{Beatmap, BeatmapSet, File, NamedFileUsage, Record, Ruleset};
use crate::store::Shared;
use exn::{OptionExt, ResultExt};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard};
use uuid::Uuid;

/// A scoped handle on the embedded database.
///
/// Sessions are cheap to open and are expected to be short-lived (the one
/// exception being the manager's update session). Dropping a session
/// releases its quiesce-gate share and decrements the manager's
/// active-usage counter exactly once.
pub struct Session {
    pub(crate) shared: Arc<Shared>,
    /// Current read snapshot, or the write transaction while one is open.
    /// `None` between transactions; reopened lazily on the next query.
    tx: Option<Transaction<'static, Sqlite>>,
    writing: bool,
    // Field order matters for drop: the usage token must decrement before
    // the gate guard releases, or quiesce could observe a stale count.
    _usage: UsageToken,
    _gate: OwnedRwLockReadGuard<()>,
}

pub(crate) struct UsageToken {
    shared: Arc<Shared>,
}

impl Drop for UsageToken {
    fn drop(&mut self) {
        self.shared.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Session {
    pub(crate) fn new(
        shared: Arc<Shared>,
        tx: Option<Transaction<'static, Sqlite>>,
        usage: UsageToken,
        gate: OwnedRwLockReadGuard<()>,
    ) -> Self {
        Self { shared, tx, writing: false, _usage: usage, _gate: gate }
    }

    pub(crate) fn usage_token(shared: Arc<Shared>) -> UsageToken {
        shared.active.fetch_add(1, Ordering::AcqRel);
        UsageToken { shared }
    }

    /// Current connection, lazily reopening a read snapshot if the previous
    /// transaction has ended.
    async fn conn(&mut self) -> Result<&mut SqliteConnection> {
        if self.tx.is_none() {
            let pool = self.shared.pool();
            self.tx = Some(Shared::begin_snapshot(&pool).await?);
        }
        self.tx.as_deref_mut().ok_or_raise(|| ErrorKind::Database)
    }

    /// Whether a write transaction is currently open on this session.
    pub fn is_writing(&self) -> bool {
        self.writing
    }

    /// Bring this session's view up to date with other sessions' commits.
    ///
    /// Ends the current read snapshot and pins a fresh one. While a write
    /// transaction is open this is a no-op: the transaction already sees
    /// its own changes, and the snapshot is renewed on commit anyway.
    pub async fn refresh(&mut self) -> Result<()> {
        if self.writing {
            return Ok(());
        }
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.or_raise(|| ErrorKind::Database)?;
        }
        self.conn().await?;
        Ok(())
    }

    /// Open a write transaction on this session.
    ///
    /// Takes the manager-wide write permit, so at most one write
    /// transaction exists at a time across all sessions. The returned
    /// guard commits explicitly; dropping it rolls back.
    pub async fn begin_write(&mut self) -> Result<WriteTransaction<'_>> {
        // A session participates in at most one transaction at a time.
        if self.writing {
            exn::bail!(ErrorKind::Database);
        }
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.or_raise(|| ErrorKind::Database)?;
        }
        let permit = self.shared.write_permit.clone().lock_owned().await;
        let pool = self.shared.pool();
        let tx = pool.begin().await.or_raise(|| ErrorKind::Database)?;
        self.tx = Some(tx);
        self.writing = true;
        Ok(WriteTransaction { session: self, _permit: permit, events: Vec::new(), done: false })
    }

    /// Pin a cross-thread handle to `record`.
    ///
    /// The handle captures the primary key, the current thread (for the
    /// attached-snapshot fast path) and a weak reference to the manager.
    pub fn live<T: Record>(&self, record: T) -> Live<T> {
        Live::new(record, &self.shared)
    }

    /* ============== *\
    |   Typed queries  |
    \* ============== */

    /// All records of a type.
    pub async fn all<T: Record>(&mut self) -> Result<Vec<T>> {
        T::fetch_all(self.conn().await?).await
    }

    /// A record by primary key.
    pub async fn find<T: Record>(&mut self, key: &T::Key) -> Result<Option<T>> {
        T::fetch(self.conn().await?, key).await
    }

    /// Insert or upsert a record by primary key.
    ///
    /// With `update_existing` an existing record is overwritten; without
    /// it, a key collision fails with
    /// [`DuplicatePrimaryKey`](ErrorKind::DuplicatePrimaryKey). Requires an
    /// open write transaction.
    pub async fn add<T: Record>(&mut self, record: &T, update_existing: bool) -> Result<()> {
        if !self.writing {
            exn::bail!(ErrorKind::NotInTransaction);
        }
        if update_existing {
            record.upsert(self.conn().await?).await
        } else {
            if T::fetch(self.conn().await?, &record.primary_key()).await?.is_some() {
                exn::bail!(ErrorKind::DuplicatePrimaryKey);
            }
            record.insert(self.conn().await?).await
        }
    }

    /// Remove a record by primary key. Requires an open write transaction.
    pub async fn remove<T: Record>(&mut self, record: &T) -> Result<()> {
        if !self.writing {
            exn::bail!(ErrorKind::NotInTransaction);
        }
        record.delete(self.conn().await?).await
    }

    /* ============== *\
    |  Domain queries  |
    \* ============== */

    pub async fn set_by_hash(&mut self, hash: &str) -> Result<Option<BeatmapSet>> {
        BeatmapSet::fetch_by_hash(self.conn().await?, hash).await
    }

    pub async fn set_by_online_id(&mut self, online_id: i64) -> Result<Option<BeatmapSet>> {
        BeatmapSet::fetch_by_online_id(self.conn().await?, online_id).await
    }

    pub async fn sets_pending_deletion(&mut self) -> Result<Vec<BeatmapSet>> {
        BeatmapSet::fetch_pending_deletion(self.conn().await?).await
    }

    pub async fn beatmaps_in_set(&mut self, set_id: &Uuid) -> Result<Vec<Beatmap>> {
        Beatmap::fetch_in_set(self.conn().await?, set_id).await
    }

    pub async fn beatmap_by_online_id(&mut self, online_id: i64) -> Result<Option<Beatmap>> {
        Beatmap::fetch_by_online_id(self.conn().await?, online_id).await
    }

    /// Look up a ruleset by online id, filtering out unavailable ones.
    pub async fn available_ruleset(&mut self, online_id: i32) -> Result<Option<Ruleset>> {
        Ruleset::fetch_available(self.conn().await?, online_id).await
    }

    /// Append a file usage to a set. Requires an open write transaction.
    pub async fn append_usage(&mut self, set_id: &Uuid, usage: &NamedFileUsage) -> Result<()> {
        if !self.writing {
            exn::bail!(ErrorKind::NotInTransaction);
        }
        NamedFileUsage::insert_for(self.conn().await?, set_id, usage).await
    }

    /// The usages owned by a set, in insertion order.
    pub async fn usages_in_set(&mut self, set_id: &Uuid) -> Result<Vec<NamedFileUsage>> {
        NamedFileUsage::fetch_in_set(self.conn().await?, set_id).await
    }

    /// Backlink count for a file: the number of usages embedding it.
    pub async fn usage_count(&mut self, file_hash: &str) -> Result<i64> {
        NamedFileUsage::count_for(self.conn().await?, file_hash).await
    }

    /// Files whose backlink count has reached zero.
    pub async fn files_without_usages(&mut self) -> Result<Vec<File>> {
        File::fetch_without_usages(self.conn().await?).await
    }
}

/// A scoped unit of writes within a session.
///
/// Ends in an explicit [`commit`](WriteTransaction::commit); dropping the
/// guard without committing rolls the transaction back and discards any
/// buffered notifications. Dereferences to the underlying [`Session`], so
/// queries and mutations run through the guard directly.
pub struct WriteTransaction<'s> {
    session: &'s mut Session,
    _permit: OwnedMutexGuard<()>,
    events: Vec<StoreEvent>,
    done: bool,
}

impl WriteTransaction<'_> {
    /// Buffer a notification to be dispatched if this transaction commits.
    pub fn notify(&mut self, event: StoreEvent) {
        self.events.push(event);
    }

    /// Commit the transaction and dispatch buffered notifications.
    pub async fn commit(mut self) -> Result<()> {
        let tx = self.session.tx.take().ok_or_raise(|| ErrorKind::Database)?;
        self.session.writing = false;
        self.done = true;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        self.session.shared.publish(std::mem::take(&mut self.events));
        Ok(())
    }

    /// Roll back explicitly, discarding buffered notifications.
    pub async fn rollback(mut self) -> Result<()> {
        let tx = self.session.tx.take().ok_or_raise(|| ErrorKind::Rollback)?;
        self.session.writing = false;
        self.done = true;
        self.events.clear();
        tx.rollback().await.or_raise(|| ErrorKind::Rollback)?;
        Ok(())
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            // Dropping the inner sqlx transaction queues a ROLLBACK on the
            // connection before it returns to the pool.
            self.session.tx = None;
            self.session.writing = false;
            self.events.clear();
        }
    }
}

impl Deref for WriteTransaction<'_> {
    type Target = Session;
    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for WriteTransaction<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}
