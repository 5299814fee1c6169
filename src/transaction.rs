//! Filepath: src/transaction.rs
//!
//! Transaction context and the commit driver.
//!
//! A [`Transaction`] is an explicit context passed by `&mut` to every
//! transactional operation. It owns the read/write set and drives the
//! five-phase commit:
//!
//! ```text
//! lock writes (sorted) -> check reads -> install writes -> unlock -> cleanup
//! ```
//!
//! Operations that detect a conflict abort the transaction on the spot and
//! return [`Abort`]; by then every participant has seen
//! `cleanup(item, false)`.

use std::collections::HashMap;
use std::fmt as StdFmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::StoConfig;
use crate::error::{Abort, AbortReason};
use crate::item::{ItemKey, LOCKED_BIT, TransItem, owner_addr};
use crate::participant::Participant;
use crate::stats;
use crate::tracing_helpers::{debug_log, trace_log};
use crate::version::{OwnerLease, OwnerTag, next_commit_tid};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
//  TxnInfo
// ============================================================================

/// What participants may know about the transaction driving them.
#[derive(Debug, Clone, Copy)]
pub struct TxnInfo {
    id: u64,
    tag: OwnerTag,
    commit_tid: u64,
    config: StoConfig,
}

impl TxnInfo {
    /// Transaction id, unique within the process.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Tag embedded in version words this transaction locks.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> OwnerTag {
        self.tag
    }

    /// Commit TID. Zero until the install phase starts.
    #[inline]
    #[must_use]
    pub const fn commit_tid(&self) -> u64 {
        self.commit_tid
    }

    /// Configuration in effect.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &StoConfig {
        &self.config
    }
}

// ============================================================================
//  Transaction
// ============================================================================

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting operations.
    Active,
    /// Committed; writes are visible.
    Committed,
    /// Aborted; nothing it wrote is visible.
    Aborted,
}

/// An open transaction.
///
/// Dropping an active transaction aborts it.
///
/// ```rust
/// use sto::{ArtTree, Transaction};
///
/// let tree: ArtTree<u64> = ArtTree::new();
///
/// let mut txn = Transaction::new();
/// tree.insert(&mut txn, b"key", 1)?;
/// txn.commit()?;
///
/// let mut txn = Transaction::new();
/// assert_eq!(tree.lookup(&mut txn, b"key")?.as_deref(), Some(&1));
/// # Ok::<(), sto::Abort>(())
/// ```
pub struct Transaction<'t> {
    info: TxnInfo,
    state: TxnState,
    items: Vec<TransItem<'t>>,
    index: HashMap<(usize, ItemKey), usize>,
    abort_reason: Option<AbortReason>,
    // Held until drop: the tag may sit in a locked word until then.
    _lease: OwnerLease,
}

impl StdFmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.info.id)
            .field("state", &self.state)
            .field("items", &self.items.len())
            .field("abort_reason", &self.abort_reason)
            .finish_non_exhaustive()
    }
}

impl Default for Transaction<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'t> Transaction<'t> {
    /// Begin a transaction with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoConfig::default())
    }

    /// Begin a transaction with `config`.
    #[must_use]
    pub fn with_config(config: StoConfig) -> Self {
        let id = NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed);
        let lease = OwnerLease::acquire();
        Self {
            info: TxnInfo {
                id,
                tag: lease.tag(),
                commit_tid: 0,
                config,
            },
            state: TxnState::Active,
            items: Vec::new(),
            index: HashMap::new(),
            abort_reason: None,
            _lease: lease,
        }
    }

    // ========================================================================
    //  Accessors
    // ========================================================================

    /// Transaction id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.info.id
    }

    /// Lock tag.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> OwnerTag {
        self.info.tag
    }

    /// Participant-facing view.
    #[inline]
    #[must_use]
    pub const fn info(&self) -> &TxnInfo {
        &self.info
    }

    /// Configuration in effect.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &StoConfig {
        &self.info.config
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> TxnState {
        self.state
    }

    /// Still accepting operations.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Committed.
    #[inline]
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.state == TxnState::Committed
    }

    /// Aborted.
    #[inline]
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state == TxnState::Aborted
    }

    /// Why the transaction aborted, if it did.
    #[inline]
    #[must_use]
    pub const fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    /// Commit TID, nonzero once a transaction with writes has committed.
    #[inline]
    #[must_use]
    pub const fn commit_tid(&self) -> u64 {
        self.info.commit_tid
    }

    /// Number of items in the read/write set.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Read/write set is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `Err(Inactive)` once the transaction has finished.
    #[inline]
    pub fn ensure_active(&self) -> Result<(), Abort> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Abort::new(self.info.id, AbortReason::Inactive))
        }
    }

    // ========================================================================
    //  Item registry
    // ========================================================================

    /// Fetch or create the item for `(owner, key)`.
    ///
    /// Repeated calls with the same pair return the same item.
    pub fn item(&mut self, owner: &'t dyn Participant, key: ItemKey) -> &mut TransItem<'t> {
        debug_assert!(self.is_active(), "item() on a finished transaction");
        let slot = (owner_addr(owner), key);
        let idx = match self.index.get(&slot) {
            Some(&idx) => idx,
            None => {
                let idx = self.items.len();
                self.items.push(TransItem::new(owner, key));
                self.index.insert(slot, idx);
                idx
            }
        };
        &mut self.items[idx]
    }

    /// The item for `(owner, key)`, if one exists.
    #[must_use]
    pub fn find_item(&self, owner: &dyn Participant, key: ItemKey) -> Option<&TransItem<'t>> {
        let idx = *self.index.get(&(owner_addr(owner), key))?;
        self.items.get(idx)
    }

    /// Mutable form of [`find_item`](Self::find_item).
    pub fn find_item_mut(
        &mut self,
        owner: &dyn Participant,
        key: ItemKey,
    ) -> Option<&mut TransItem<'t>> {
        let idx = *self.index.get(&(owner_addr(owner), key))?;
        self.items.get_mut(idx)
    }

    /// Items in insertion order.
    pub fn items(&self) -> impl Iterator<Item = &TransItem<'t>> {
        self.items.iter()
    }

    // ========================================================================
    //  Abort
    // ========================================================================

    /// Abort at the caller's request.
    pub fn abort(&mut self) -> Abort {
        self.abort_because(AbortReason::Explicit)
    }

    /// Abort with `reason`: release held locks, run `cleanup(_, false)` on
    /// every item, and return the error to propagate.
    ///
    /// Aborting a finished transaction only builds the error.
    pub fn abort_because(&mut self, reason: AbortReason) -> Abort {
        if self.is_active() {
            self.release_locks();
            self.state = TxnState::Aborted;
            self.abort_reason = Some(reason);
            for item in &mut self.items {
                let owner = item.owner();
                owner.cleanup(item, false);
            }
            stats::record_abort(reason);
            debug_log!(txn = self.info.id, %reason, items = self.items.len(), "transaction aborted");
        }
        Abort::new(self.info.id, reason)
    }

    // ========================================================================
    //  Commit
    // ========================================================================

    /// Run the commit protocol. `true` if the transaction committed.
    ///
    /// Calling this again returns the earlier outcome.
    pub fn try_commit(&mut self) -> bool {
        match self.state {
            TxnState::Committed => return true,
            TxnState::Aborted => return false,
            TxnState::Active => {}
        }

        // Phase 1: lock the write set in a transaction-independent order.
        let mut writes: Vec<usize> = (0..self.items.len())
            .filter(|&i| self.items[i].has_write())
            .collect();
        writes.sort_unstable_by_key(|&i| self.items[i].order_key());

        for &i in &writes {
            if !self.lock_item(i) {
                debug_log!(txn = self.info.id, item = ?self.items[i].key(), "commit lock failed");
                self.abort_because(AbortReason::CommitLock);
                return false;
            }
        }

        // Phase 2: validate the read set.
        for i in 0..self.items.len() {
            let item = &self.items[i];
            if item.has_read() && !item.owner().check(item, &self.info) {
                debug_log!(txn = self.info.id, item = ?item.key(), "validation failed");
                self.abort_because(AbortReason::Validation);
                return false;
            }
        }

        // Phase 3: install in program order.
        if !writes.is_empty() {
            self.info.commit_tid = next_commit_tid();
            for item in &mut self.items {
                if item.has_write() {
                    let owner = item.owner();
                    owner.install(item, &self.info);
                }
            }
        }

        // Phase 4.
        self.release_locks();
        self.state = TxnState::Committed;

        // Phase 5.
        for item in &mut self.items {
            let owner = item.owner();
            owner.cleanup(item, true);
        }

        stats::record_commit();
        trace_log!(txn = self.info.id, tid = self.info.commit_tid, writes = writes.len(), "committed");
        true
    }

    /// [`try_commit`](Self::try_commit) as a `Result`.
    pub fn commit(mut self) -> Result<(), Abort> {
        if self.try_commit() {
            return Ok(());
        }
        Err(Abort::new(
            self.info.id,
            self.abort_reason.unwrap_or(AbortReason::Validation),
        ))
    }

    fn lock_item(&mut self, i: usize) -> bool {
        let item = &mut self.items[i];
        let owner = item.owner();
        if owner.lock(item, &self.info) {
            item.add_flags(LOCKED_BIT);
            return true;
        }
        false
    }

    fn release_locks(&mut self) {
        for item in &mut self.items {
            if item.needs_unlock() {
                let owner = item.owner();
                owner.unlock(item);
                item.clear_flags(LOCKED_BIT);
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.is_active() {
            self.abort_because(AbortReason::Explicit);
        }
    }
}

// ============================================================================
//  Retry helpers
// ============================================================================

/// Run `body` in fresh transactions until one commits.
///
/// ```rust
/// use sto::{ArtTree, atomically};
///
/// let tree: ArtTree<u64> = ArtTree::new();
/// atomically(|txn| tree.insert(txn, b"counter", 1));
/// let value = atomically(|txn| tree.lookup(txn, b"counter"));
/// assert_eq!(value.as_deref(), Some(&1));
/// ```
pub fn atomically<'t, T, F>(mut body: F) -> T
where
    F: FnMut(&mut Transaction<'t>) -> Result<T, Abort>,
{
    let config = StoConfig::default();
    let mut attempt: u32 = 0;
    loop {
        let mut txn = Transaction::with_config(config);
        if let Ok(value) = body(&mut txn)
            && txn.try_commit()
        {
            return value;
        }
        drop(txn);
        config.backoff.pause(attempt);
        attempt = attempt.saturating_add(1);
    }
}

/// Like [`atomically`], but gives up after `config.max_attempts` and
/// returns the last abort.
pub fn atomically_with<'t, T, F>(config: &StoConfig, mut body: F) -> Result<T, Abort>
where
    F: FnMut(&mut Transaction<'t>) -> Result<T, Abort>,
{
    let mut attempt: u32 = 0;
    loop {
        let mut txn = Transaction::with_config(*config);
        let err = match body(&mut txn) {
            Ok(value) => match txn.commit() {
                Ok(()) => return Ok(value),
                Err(err) => err,
            },
            Err(err) => err,
        };
        attempt = attempt.saturating_add(1);
        if config.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(err);
        }
        config.backoff.pause(attempt);
    }
}

#[cfg(all(test, not(loom)))]
mod shuttle_tests;
