//! Filepath: src/participant.rs
//!
//! The protocol every transactional container implements so the commit
//! driver can lock, validate, install and release its items.

use crate::item::TransItem;
use crate::transaction::TxnInfo;

/// A transactional object (or container of objects) taking part in commit.
///
/// The driver calls, per committing transaction:
/// 1. [`lock`](Self::lock) on every write item, in a global order,
/// 2. [`check`](Self::check) on every read item,
/// 3. [`install`](Self::install) on every write item, in insertion order,
/// 4. [`unlock`](Self::unlock) on every item still marked as locked,
/// 5. [`cleanup`](Self::cleanup) on every item, committed or not.
///
/// On abort only steps 4 and 5 run, with `committed == false`.
///
/// Implementations set nothing on the item in `lock`; the driver marks the
/// item locked when `lock` returns `true`. `install` may release the lock
/// itself (publishing the new version and unlocking in one store) and then
/// clears [`LOCKED_BIT`](crate::item::LOCKED_BIT) so `unlock` is skipped.
pub trait Participant: Send + Sync {
    /// Acquire the lock backing `item`. `false` aborts the transaction.
    fn lock(&self, item: &mut TransItem<'_>, txn: &TxnInfo) -> bool;

    /// Whether the version observed by `item` still holds.
    fn check(&self, item: &TransItem<'_>, txn: &TxnInfo) -> bool;

    /// Apply `item`'s pending write. The lock is held.
    fn install(&self, item: &mut TransItem<'_>, txn: &TxnInfo);

    /// Release the lock taken by [`lock`](Self::lock).
    fn unlock(&self, item: &mut TransItem<'_>);

    /// Finalize `item` after the outcome is known. Must be idempotent.
    fn cleanup(&self, item: &mut TransItem<'_>, committed: bool) {
        let _ = (item, committed);
    }
}
