//! The database session manager.
//!
//! [`Database`] owns the single SQLite file backing the library and is the
//! only type that knows it exists. Everything else goes through sessions:
//! the long-lived update session, transient read sessions, and transient
//! write sessions serialized by a global write permit.

use crate::DATABASE_FILENAME;
use crate::error::{ErrorKind, Result};
use crate::events::StoreEvent;
use crate::session::Session;
use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::sync::mpsc;
use tokio::sync::{Mutex as TokioMutex, OwnedRwLockWriteGuard, RwLock as TokioRwLock};
use tracing::instrument;

/// Embedded migrations; the persisted schema version is the migrator's
/// monotonically increasing integer version, applied inside `open`.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Options for opening a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Directory that holds the database file (and, by convention, the
    /// blob store alongside it).
    pub storage_root: PathBuf,
    /// Maximum pooled connections; one per concurrently live session is
    /// enough, plus headroom for transient readers.
    pub max_connections: u32,
}

impl DatabaseOptions {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self { storage_root: storage_root.into(), max_connections: 8 }
    }
}

/// Shared manager state behind the cloneable [`Database`] handle.
pub(crate) struct Shared {
    /// Swapped out wholesale on `reset`; sessions clone the handle under
    /// the read half.
    pool: StdRwLock<SqlitePool>,
    /// Quiesce gate: every session holds a read share, `block_all_operations`
    /// takes the write half.
    pub(crate) gate: Arc<TokioRwLock<()>>,
    /// Global write serialization.
    pub(crate) write_permit: Arc<TokioMutex<()>>,
    /// Outstanding session count; incremented at session creation and
    /// decremented exactly once on release.
    pub(crate) active: AtomicUsize,
    pub(crate) closed: AtomicBool,
    update: TokioMutex<Option<Session>>,
    subscribers: StdMutex<Vec<mpsc::UnboundedSender<StoreEvent>>>,
    storage_root: PathBuf,
    db_path: PathBuf,
    max_connections: u32,
}

impl Shared {
    pub(crate) fn pool(&self) -> SqlitePool {
        self.pool.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Begin a transaction and pin its WAL snapshot immediately, rather
    /// than at the first caller query.
    pub(crate) async fn begin_snapshot(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
        let mut tx = pool.begin().await.or_raise(|| ErrorKind::StorageUnavailable)?;
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM sqlite_schema")
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(tx)
    }

    /// Open a fresh session, waiting on the quiesce gate if one is held.
    ///
    /// `pin_snapshot` controls whether a read snapshot is taken up front;
    /// write sessions skip it since their first act is `begin_write`.
    pub(crate) async fn open_session(self: &Arc<Self>, pin_snapshot: bool) -> Result<Session> {
        if self.closed.load(Ordering::Acquire) {
            exn::bail!(ErrorKind::Closed);
        }
        let gate = self.gate.clone().read_owned().await;
        if self.closed.load(Ordering::Acquire) {
            exn::bail!(ErrorKind::Closed);
        }
        let usage = Session::usage_token(self.clone());
        let tx = match pin_snapshot {
            true => Some(Self::begin_snapshot(&self.pool()).await?),
            false => None,
        };
        Ok(Session::new(self.clone(), tx, usage, gate))
    }

    /// Dispatch committed notifications to all subscribers, dropping any
    /// whose receiver has gone away.
    pub(crate) fn publish(&self, events: Vec<StoreEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|sender| events.iter().all(|event| sender.send(event.clone()).is_ok()));
    }
}

/// The database session manager.
///
/// Cheap to clone; all clones share one underlying manager. See the crate
/// docs for the session model.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Shared>,
}

/// The long-lived update session, exclusively borrowed from the manager.
///
/// Only one task can hold this guard at a time, which is what makes the
/// update session safe to keep open across the host's whole lifetime.
pub type UpdateSession<'a> = tokio::sync::MappedMutexGuard<'a, Session>;

/// Scoped token returned by [`Database::block_all_operations`]; the quiesce
/// gate is released when it drops.
pub struct OperationBlock {
    _guard: OwnedRwLockWriteGuard<()>,
}

impl Database {
    /// Open (or create) the database under `storage_root` with defaults.
    pub async fn open(storage_root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(DatabaseOptions::new(storage_root.as_ref())).await
    }

    /// Open (or create) the database with explicit options.
    ///
    /// Runs pending schema migrations inside the open; a migration failure
    /// surfaces as [`SchemaMigrationFailed`](ErrorKind::SchemaMigrationFailed)
    /// and leaves the file untouched beyond migrations already applied.
    pub async fn open_with(options: DatabaseOptions) -> Result<Self> {
        tokio::fs::create_dir_all(&options.storage_root)
            .await
            .or_raise(|| ErrorKind::StorageUnavailable)?;
        let db_path = options.storage_root.join(DATABASE_FILENAME);
        let pool = Self::connect(&db_path, options.max_connections).await?;
        Ok(Self {
            inner: Arc::new(Shared {
                pool: StdRwLock::new(pool),
                gate: Arc::new(TokioRwLock::new(())),
                write_permit: Arc::new(TokioMutex::new(())),
                active: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                update: TokioMutex::new(None),
                subscribers: StdMutex::new(Vec::new()),
                storage_root: options.storage_root,
                db_path,
                max_connections: options.max_connections,
            }),
        })
    }

    async fn connect(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            // WAL keeps readers running while a write transaction is open
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // Sessions hold snapshots open; give writers some patience
            .busy_timeout(std::time::Duration::from_millis(1500));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::StorageUnavailable)?;
        MIGRATOR.run(&pool).await.or_raise(|| ErrorKind::SchemaMigrationFailed)?;
        Ok(pool)
    }

    /// Directory containing the database file.
    pub fn storage_root(&self) -> &Path {
        &self.inner.storage_root
    }

    /// A fresh read session pinned to the current database state.
    pub async fn read_session(&self) -> Result<Session> {
        self.inner.open_session(true).await
    }

    /// A fresh session intended for writing; call
    /// [`begin_write`](Session::begin_write) on it to start the
    /// transaction. Writers are serialized; this call itself never blocks
    /// on other writers.
    pub async fn write_session(&self) -> Result<Session> {
        self.inner.open_session(false).await
    }

    /// The long-lived update session, created lazily on first access.
    ///
    /// All subsequent accesses return the same session (behind the guard).
    pub async fn update_session(&self) -> Result<UpdateSession<'_>> {
        if self.inner.closed.load(Ordering::Acquire) {
            exn::bail!(ErrorKind::Closed);
        }
        let mut guard = self.inner.update.lock().await;
        if guard.is_none() {
            *guard = Some(self.inner.open_session(true).await?);
        }
        Ok(tokio::sync::MutexGuard::map(guard, |opt| match opt {
            Some(session) => session,
            None => unreachable!("update session initialized above"),
        }))
    }

    /// Host update tick: refresh the update session if it exists, pulling
    /// in commits made by other sessions since its last snapshot.
    pub async fn refresh(&self) -> Result<()> {
        let mut guard = self.inner.update.lock().await;
        if let Some(session) = guard.as_mut() {
            session.refresh().await?;
        }
        Ok(())
    }

    /// Subscribe to committed change notifications.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner()).push(sender);
        receiver
    }

    /// Outstanding session count. Mostly useful for diagnostics and tests.
    pub fn active_usages(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Quiesce: close the update session, wait for every outstanding
    /// session to be released, and gate out new ones until the returned
    /// token is dropped.
    ///
    /// The caller must not itself hold a session, or this waits forever.
    #[instrument(skip(self), name = "blocking all database operations")]
    pub async fn block_all_operations(&self) -> Result<OperationBlock> {
        if self.inner.closed.load(Ordering::Acquire) {
            exn::bail!(ErrorKind::Closed);
        }
        {
            let mut guard = self.inner.update.lock().await;
            *guard = None;
        }
        let write = self.inner.gate.clone().write_owned().await;
        debug_assert_eq!(self.inner.active.load(Ordering::Acquire), 0);
        Ok(OperationBlock { _guard: write })
    }

    /// Compact the database file. Quiesces internally.
    pub async fn compact(&self) -> Result<()> {
        let _block = self.block_all_operations().await?;
        let pool = self.inner.pool();
        sqlx::query("VACUUM").execute(&pool).await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Delete the database file and start over empty. Quiesces internally.
    pub async fn reset(&self) -> Result<()> {
        let _block = self.block_all_operations().await?;
        self.inner.pool().close().await;
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.inner.db_path.clone().into_os_string();
            path.push(suffix);
            let path = PathBuf::from(path);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => Err(e).or_raise(|| ErrorKind::StorageUnavailable)?,
            }
        }
        let pool = Self::connect(&self.inner.db_path, self.inner.max_connections).await?;
        *self.inner.pool.write().unwrap_or_else(|e| e.into_inner()) = pool;
        Ok(())
    }

    /// Dispose of the manager.
    ///
    /// Quiesces, then holds the gate for the remainder of the process so
    /// that nothing can come back to life behind our back; every entry
    /// point checks the closed flag first and fails with
    /// [`Closed`](ErrorKind::Closed).
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut guard = self.inner.update.lock().await;
            *guard = None;
        }
        let gate = self.inner.gate.clone().write_owned().await;
        std::mem::forget(gate);
        self.inner.pool().close().await;
    }
}
