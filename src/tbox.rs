//! Filepath: src/tbox.rs
//!
//! [`TBox`]: one transactional value.

use std::fmt as StdFmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Abort, AbortReason};
use crate::item::{ItemKey, LOCKED_BIT, TransItem};
use crate::participant::Participant;
use crate::transaction::{Transaction, TxnInfo};
use crate::version::{OwnerTag, VersionWord, next_commit_tid};

const KEY: ItemKey = ItemKey::Record(0);

/// A single transactional cell.
///
/// Reads are validated at commit; writes are blind and applied at commit.
///
/// ```rust
/// use sto::{TBox, Transaction};
///
/// let balance = TBox::new(10_i64);
/// let mut txn = Transaction::new();
/// let current = *balance.read(&mut txn)?;
/// balance.write(&mut txn, current + 5)?;
/// txn.commit()?;
/// assert_eq!(*balance.nontrans_read(), 15);
/// # Ok::<(), sto::Abort>(())
/// ```
pub struct TBox<T> {
    version: VersionWord,
    value: RwLock<Arc<T>>,
}

impl<T: StdFmt::Debug> StdFmt::Debug for TBox<T> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("TBox")
            .field("version", &self.version)
            .field("value", &*self.value.read())
            .finish()
    }
}

impl<T: Default + Send + Sync + 'static> Default for TBox<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Send + Sync + 'static> TBox<T> {
    /// Box holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            version: VersionWord::new(0),
            value: RwLock::new(Arc::new(value)),
        }
    }

    /// Read the value, or this transaction's pending write.
    ///
    /// # Errors
    ///
    /// [`Validation`](AbortReason::Validation) if the value changed since
    /// `txn` first read it.
    pub fn read<'t>(&'t self, txn: &mut Transaction<'t>) -> Result<Arc<T>, Abort> {
        txn.ensure_active()?;
        let item = txn.item(self, KEY);
        if let Some(pending) = item.write_value::<T>() {
            return Ok(Arc::clone(pending));
        }
        let (seen, value) = self.versioned_read();
        if item.has_read() && item.read_version() != seen {
            return Err(txn.abort_because(AbortReason::Validation));
        }
        item.observe(seen);
        Ok(value)
    }

    /// Stage `value` to be written at commit.
    ///
    /// # Errors
    ///
    /// [`Inactive`](AbortReason::Inactive) on a finished transaction.
    pub fn write<'t>(&'t self, txn: &mut Transaction<'t>, value: T) -> Result<(), Abort> {
        txn.ensure_active()?;
        txn.item(self, KEY).add_write(Arc::new(value));
        Ok(())
    }

    /// Current committed value, outside any transaction.
    #[must_use]
    pub fn nontrans_read(&self) -> Arc<T> {
        self.versioned_read().1
    }

    /// Overwrite the value outside any transaction.
    ///
    /// Transactions that read the old value fail validation.
    pub fn nontrans_write(&self, value: T) {
        self.version.lock(OwnerTag::ANONYMOUS);
        *self.value.write() = Arc::new(value);
        self.version.set_version_unlock(next_commit_tid());
    }

    fn versioned_read(&self) -> (u64, Arc<T>) {
        loop {
            let before = self.version.stable();
            let value = Arc::clone(&self.value.read());
            if self.version.value() == before {
                return (before, value);
            }
        }
    }
}

impl<T: Send + Sync + 'static> Participant for TBox<T> {
    fn lock(&self, item: &mut TransItem<'_>, txn: &TxnInfo) -> bool {
        let spins = txn.config().commit_lock_spins.max(1);
        for attempt in 0..spins {
            if self.version.try_lock(txn.tag()) {
                return true;
            }
            if item.has_read() {
                return false;
            }
            txn.config().backoff.pause(attempt);
        }
        false
    }

    fn check(&self, item: &TransItem<'_>, txn: &TxnInfo) -> bool {
        self.version.check(item.read_version(), txn.tag())
    }

    fn install(&self, item: &mut TransItem<'_>, txn: &TxnInfo) {
        if let Some(value) = item.take_write_value::<T>() {
            *self.value.write() = value;
        }
        self.version.set_version_unlock(txn.commit_tid());
        item.clear_flags(LOCKED_BIT);
    }

    fn unlock(&self, _item: &mut TransItem<'_>) {
        self.version.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_your_writes() {
        let cell = TBox::new(1_u32);
        let mut txn = Transaction::new();
        cell.write(&mut txn, 2).unwrap();
        assert_eq!(*cell.read(&mut txn).unwrap(), 2);
        assert_eq!(*cell.nontrans_read(), 1);
        txn.commit().unwrap();
        assert_eq!(*cell.nontrans_read(), 2);
    }

    #[test]
    fn test_stale_read_fails_validation() {
        let cell = TBox::new(1_u32);
        let mut txn = Transaction::new();
        assert_eq!(*cell.read(&mut txn).unwrap(), 1);
        cell.nontrans_write(5);
        let err = txn.commit().unwrap_err();
        assert_eq!(err.reason(), AbortReason::Validation);
    }

    #[test]
    fn test_changed_value_aborts_second_read() {
        let cell = TBox::new(1_u32);
        let mut txn = Transaction::new();
        cell.read(&mut txn).unwrap();
        cell.nontrans_write(2);
        let err = cell.read(&mut txn).unwrap_err();
        assert_eq!(err.reason(), AbortReason::Validation);
    }

    #[test]
    fn test_read_modify_write_commits() {
        let cell = TBox::new(10_i64);
        let mut txn = Transaction::new();
        let v = *cell.read(&mut txn).unwrap();
        cell.write(&mut txn, v * 2).unwrap();
        assert!(txn.try_commit());
        assert_eq!(*cell.nontrans_read(), 20);
        assert!(!cell.version.is_locked());
    }

    #[test]
    fn test_write_on_finished_transaction() {
        let cell = TBox::new(0_u8);
        let mut txn = Transaction::new();
        let _ = txn.abort();
        assert_eq!(
            cell.write(&mut txn, 1).unwrap_err().reason(),
            AbortReason::Inactive
        );
    }
}
