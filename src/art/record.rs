//! Filepath: src/art/record.rs
//!
//! [`Record`]: the versioned value cell at the end of a key path.
//!
//! The value is an `Arc<V>` published as a raw pointer. Readers load it under
//! a seize guard and take their own strong reference; installs swap in the
//! new `Arc` and retire the old one through the guard.
//!
//! Status lives in two places:
//! - the `USER` bit of the version: inserted by a transaction that has not
//!   committed yet, invisible to everyone else;
//! - `deleted`: a committed delete, waiting for cleanup to unlink it.

use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use seize::{Guard, LocalGuard};

use super::reclaim::reclaim_arc;
use crate::error::{Abort, AbortReason};
use crate::item::{ItemKey, TransItem, USER0_BIT, USER1_BIT};
use crate::participant::Participant;
use crate::transaction::{Transaction, TxnInfo};
use crate::version::{self, INCREMENT, NONOPAQUE_BIT, USER_BIT, VersionWord};

/// Item flag: this transaction created the record.
pub(crate) const INSERTED_BIT: u32 = USER0_BIT;

/// Item flag: this transaction's write is a logical delete.
pub(crate) const DELETE_BIT: u32 = USER1_BIT;

/// Value cell of one key.
pub(crate) struct Record<V> {
    pub(crate) version: VersionWord,
    deleted: AtomicBool,
    value: AtomicPtr<V>,
    key: Box<[u8]>,
    _marker: PhantomData<Arc<V>>,
}

impl<V> StdFmt::Debug for Record<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Record")
            .field("key", &self.key)
            .field("version", &self.version)
            .field("deleted", &self.is_deleted())
            .finish_non_exhaustive()
    }
}

impl<V> Drop for Record<V> {
    fn drop(&mut self) {
        let value = *self.value.get_mut();
        if !value.is_null() {
            // SAFETY: the slot holds one strong count from `Arc::into_raw`;
            // replaced values were retired separately.
            unsafe { drop(Arc::from_raw(value)) };
        }
    }
}

impl<V> Record<V> {
    #[inline]
    pub(crate) fn key(&self) -> &[u8] {
        &self.key
    }

    #[inline]
    pub(crate) fn item_key(&self) -> ItemKey {
        ItemKey::Record(std::ptr::from_ref(self).addr())
    }

    #[inline]
    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

impl<V: Send + Sync + 'static> Record<V> {
    /// A record created by an open transaction: hidden until it commits.
    pub(crate) fn new_inserted(key: &[u8], value: Arc<V>) -> Self {
        Self {
            version: VersionWord::new(INCREMENT | NONOPAQUE_BIT | USER_BIT),
            deleted: AtomicBool::new(false),
            value: AtomicPtr::new(Arc::into_raw(value).cast_mut()),
            key: key.into(),
            _marker: PhantomData,
        }
    }

    // ========================================================================
    //  Value slot
    // ========================================================================

    /// Current value. The guard keeps the pointee alive until we own a count.
    pub(crate) fn load_value(&self, _guard: &LocalGuard<'_>) -> Arc<V> {
        let ptr = self.value.load(Ordering::Acquire);
        // SAFETY: the slot always holds a live `Arc` pointer; a replaced one
        // is retired through the collector and cannot be freed while
        // `_guard` is held.
        unsafe {
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        }
    }

    /// Publish `value`, retiring the previous one. Caller holds the lock.
    pub(crate) fn swap_value(&self, value: Arc<V>, guard: &LocalGuard<'_>) {
        debug_assert!(self.version.is_locked(), "swap_value() without the lock");
        let old = self
            .value
            .swap(Arc::into_raw(value).cast_mut(), Ordering::AcqRel);
        // SAFETY: `old` came from `Arc::into_raw` and is now unreachable for
        // new readers; readers already holding it are covered by seize.
        unsafe { guard.defer_retire(old, reclaim_arc::<V>) };
    }

    /// Flag a committed delete. Caller holds the lock.
    pub(crate) fn mark_deleted(&self) {
        debug_assert!(self.version.is_locked(), "mark_deleted() without the lock");
        self.deleted.store(true, Ordering::Release);
    }

    /// Consistent `(version, value)` pair.
    ///
    /// Spins while the record is locked and retries if the word moved while
    /// the value was loaded.
    fn versioned_read(&self, guard: &LocalGuard<'_>) -> (u64, Arc<V>) {
        loop {
            let before = self.version.stable();
            let value = self.load_value(guard);
            if self.version.value() == before {
                return (before, value);
            }
        }
    }

    // ========================================================================
    //  Transactional access
    // ========================================================================

    /// Read with read-your-writes.
    ///
    /// The caller has registered the item (and pinned this record).
    pub(crate) fn read<'t>(
        &self,
        owner: &'t dyn Participant,
        txn: &mut Transaction<'t>,
        guard: &LocalGuard<'_>,
    ) -> Result<Arc<V>, Abort> {
        let key = self.item_key();
        let item = txn.item(owner, key);
        if let Some(pending) = item.write_value::<V>() {
            return Ok(Arc::clone(pending));
        }
        let mine = item.has_flags(INSERTED_BIT);

        let (seen, value) = self.versioned_read(guard);
        if version::is_user(seen) && !mine {
            return Err(txn.abort_because(AbortReason::ForeignInsert));
        }
        txn.item(owner, key).observe(seen);
        Ok(value)
    }

    /// Stage `value` as a non-blind write: the current version is observed
    /// so a concurrent delete or overwrite fails validation.
    pub(crate) fn update<'t>(
        &self,
        owner: &'t dyn Participant,
        txn: &mut Transaction<'t>,
        value: Arc<V>,
    ) -> Result<(), Abort> {
        let key = self.item_key();
        let mine = txn.item(owner, key).has_flags(INSERTED_BIT);

        let seen = self.version.stable();
        if version::is_user(seen) && !mine {
            return Err(txn.abort_because(AbortReason::ForeignInsert));
        }
        if self.is_deleted() {
            return Err(txn.abort_because(AbortReason::Tombstone));
        }

        let item = txn.item(owner, key);
        item.add_write(value);
        item.observe(seen);
        Ok(())
    }

    /// Turn this transaction's write into a delete.
    pub(crate) fn set_deleted<'t>(
        &self,
        owner: &'t dyn Participant,
        txn: &mut Transaction<'t>,
        guard: &LocalGuard<'_>,
    ) -> Result<(), Abort> {
        let key = self.item_key();
        let mine = txn.item(owner, key).has_flags(INSERTED_BIT);
        if self.version.is_user() && !mine {
            return Err(txn.abort_because(AbortReason::ForeignInsert));
        }
        if self.is_deleted() {
            return Err(txn.abort_because(AbortReason::Tombstone));
        }

        let item = txn.item(owner, key);
        if !item.has_write() {
            item.add_write(self.load_value(guard));
        }
        item.add_flags(DELETE_BIT);
        Ok(())
    }

    /// Cancel a pending delete so a following write acts as an update.
    pub(crate) fn set_undeleted(&self, item: &mut TransItem<'_>) {
        debug_assert_eq!(item.key(), self.item_key());
        item.clear_flags(DELETE_BIT);
    }

    // ========================================================================
    //  Commit hooks
    // ========================================================================

    /// Bounded lock attempts for commit phase 1.
    pub(crate) fn lock_for_commit(&self, item: &TransItem<'_>, txn: &TxnInfo) -> bool {
        let mine = item.has_flags(INSERTED_BIT);
        let spins = txn.config().commit_lock_spins.max(1);
        for attempt in 0..spins {
            if self.version.is_user() && !mine {
                return false;
            }
            if self.version.try_lock(txn.tag()) {
                return true;
            }
            // A read of a version someone else holds cannot validate.
            if item.has_read() {
                return false;
            }
            txn.config().backoff.pause(attempt);
        }
        false
    }

    /// Commit phase 2 rule for a record read.
    pub(crate) fn check(&self, item: &TransItem<'_>, txn: &TxnInfo) -> bool {
        self.version.check(item.read_version(), txn.tag()) && !self.is_deleted()
    }

    /// Commit phase 3: apply the write and release the lock in one store.
    pub(crate) fn install(
        &self,
        delete: bool,
        value: Option<Arc<V>>,
        txn: &TxnInfo,
        guard: &LocalGuard<'_>,
    ) {
        if delete {
            self.mark_deleted();
        } else if let Some(value) = value {
            self.swap_value(value, guard);
        }
        self.version
            .set_version_unlock(txn.commit_tid() | NONOPAQUE_BIT);
    }
}
