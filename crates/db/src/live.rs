//! Thread-portable references to persisted records.
//!
//! A session is pinned to the task that drives it, so a record fetched on
//! one thread cannot simply be dereferenced on another. [`Live`] solves
//! this by carrying the record's primary key instead of the record: each
//! operation takes a callback, resolves the record on the current thread,
//! and invokes the callback within that scope. The callback receives a
//! borrow, so a managed record cannot escape it: the lifetime rules the
//! source pattern enforced by convention are compile errors here.

use crate::error::{ErrorKind, Result};
use crate::models::Record;
use crate::store::Shared;
use exn::OptionExt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

/// A value pinned to the thread that created it.
///
/// Reading it from any other thread fails with
/// [`LeakedManagedObject`](ErrorKind::LeakedManagedObject): the value has
/// been smuggled out of the scope it is managed by. [`Live`] uses this to
/// guard its attached snapshot; the slow path re-resolves by primary key
/// instead of touching the snapshot.
#[derive(Debug)]
pub struct ThreadBound<T> {
    value: T,
    owner: ThreadId,
}

impl<T> ThreadBound<T> {
    pub fn new(value: T) -> Self {
        Self { value, owner: thread::current().id() }
    }

    /// Borrow the value, on the owning thread only.
    pub fn get(&self) -> Result<&T> {
        if thread::current().id() == self.owner {
            Ok(&self.value)
        } else {
            exn::bail!(ErrorKind::LeakedManagedObject)
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }
}

/// A live handle: a thread-portable reference to a persisted record.
///
/// Captures the record's primary key, the originating thread affinity, and
/// a weak reference to the session manager. Obtained from
/// [`Session::live`](crate::Session::live).
pub struct Live<T: Record> {
    key: T::Key,
    shared: Weak<Shared>,
    attached: Arc<ThreadBound<T>>,
}

impl<T: Record> Clone for Live<T> {
    fn clone(&self) -> Self {
        Self { key: self.key.clone(), shared: self.shared.clone(), attached: self.attached.clone() }
    }
}

impl<T: Record> Live<T> {
    pub(crate) fn new(record: T, shared: &Arc<Shared>) -> Self {
        Self {
            key: record.primary_key(),
            shared: Arc::downgrade(shared),
            attached: Arc::new(ThreadBound::new(record)),
        }
    }

    /// The record's primary key.
    pub fn key(&self) -> &T::Key {
        &self.key
    }

    /// Invoke `f` with the referenced record.
    ///
    /// On the originating thread the attached snapshot is used directly;
    /// anywhere else a transient read session resolves the record by
    /// primary key. Fails with [`NotFound`](ErrorKind::NotFound) if the
    /// record has been deleted, or [`Closed`](ErrorKind::Closed) if the
    /// manager is gone.
    pub async fn perform_read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let shared = self.shared.upgrade().ok_or_raise(|| ErrorKind::Closed)?;
        if !shared.closed.load(Ordering::Acquire) {
            if let Ok(value) = self.attached.get() {
                return Ok(f(value));
            }
        }
        let mut session = shared.open_session(true).await?;
        match session.find::<T>(&self.key).await? {
            Some(record) => Ok(f(&record)),
            None => exn::bail!(ErrorKind::NotFound),
        }
    }

    /// Resolve the record, apply `f`, and persist the result.
    ///
    /// Always opens a fresh write session and transaction; commits when `f`
    /// returns `Ok`, rolls back when it fails.
    pub async fn perform_write<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let shared = self.shared.upgrade().ok_or_raise(|| ErrorKind::Closed)?;
        let mut session = shared.open_session(false).await?;
        let mut tx = session.begin_write().await?;
        let Some(mut record) = tx.find::<T>(&self.key).await? else {
            exn::bail!(ErrorKind::NotFound);
        };
        let out = f(&mut record)?;
        tx.add(&record, true).await?;
        tx.commit().await?;
        Ok(out)
    }
}
