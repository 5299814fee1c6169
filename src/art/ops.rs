//! Filepath: src/art/ops.rs
//!
//! Tree operations: transactional lookup, insert/update and remove, the
//! non-transactional removal path, and node growth.
//!
//! Traversal is optimistic. Each hop snapshots the node's version, reads the
//! child, and re-reads the version; a change repeats the hop and an invalid
//! node restarts from the root. Structural changes lock one node at a time,
//! except growth, which holds the grown node while it locks the parent to
//! splice the replacement in. Locks are only ever waited on upward.

use std::any::Any;
use std::sync::Arc;

use seize::{Guard, LocalGuard};

use super::node::{NodeKind, TrieNode};
use super::reclaim::{pin_arc, reclaim_arc};
use super::record::{DELETE_BIT, INSERTED_BIT, Record};
use super::ArtTree;
use crate::error::Abort;
use crate::item::ItemKey;
use crate::stats;
use crate::tracing_helpers::{debug_log, trace_log, warn_log};
use crate::transaction::Transaction;
use crate::version::{self, INCREMENT, INVALID_BIT, MUST_GROW_BIT, NONOPAQUE_BIT, OwnerTag, VersionGuard};

/// Borrow a published pointer for as long as `_guard` is held.
///
/// # Safety
///
/// `ptr` must have been loaded from the tree while `_guard` was held, or be
/// pinned by the caller.
#[inline]
pub(super) unsafe fn deref<'g, T>(ptr: *const T, _guard: &'g LocalGuard<'_>) -> &'g T {
    // SAFETY: Caller guarantees the pointee outlives the guard.
    unsafe { &*ptr }
}

/// Outcome of one attempt at a step that may have to start over.
enum Step<T> {
    Done(T),
    Retry,
}

/// Where a read-only descent stopped.
enum Descent<V> {
    /// The whole key was consumed at `node`.
    Reached { node: *mut TrieNode<V>, version: u64 },
    /// `node` has no child for the next key byte.
    Missing { node: *mut TrieNode<V>, version: u64 },
}

impl<V: Send + Sync + 'static> ArtTree<V> {
    // ========================================================================
    //  Transactional API
    // ========================================================================

    /// Look `key` up, registering what was seen in `txn`.
    ///
    /// A missing key is recorded as an absent observation on the deepest node
    /// reached, so a concurrent insert of that key makes `txn` fail
    /// validation.
    ///
    /// # Errors
    ///
    /// [`ForeignInsert`](crate::AbortReason::ForeignInsert) if the key was
    /// inserted by another transaction that has not committed.
    pub fn lookup<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        key: &[u8],
    ) -> Result<Option<Arc<V>>, Abort> {
        txn.ensure_active()?;
        let guard = self.collector.enter();
        loop {
            let (node_ptr, version) = match self.descend(key, &guard) {
                Descent::Missing { node, version } => {
                    self.observe_absent(txn, node, version);
                    return Ok(None);
                }
                Descent::Reached { node, version } => (node, version),
            };

            // SAFETY: loaded from the tree under `guard`.
            let node = unsafe { deref(node_ptr, &guard) };
            let record = node.record();
            if node.version.value() != version {
                continue;
            }
            if record.is_null() {
                self.observe_absent(txn, node_ptr, version);
                return Ok(None);
            }
            return self.read_record(txn, record, &guard);
        }
    }

    /// Insert `key`, or overwrite its value if present.
    ///
    /// A new key stays invisible to other transactions until `txn` commits.
    ///
    /// # Errors
    ///
    /// [`ForeignInsert`](crate::AbortReason::ForeignInsert) if another open
    /// transaction inserted the key; [`Tombstone`](crate::AbortReason::Tombstone)
    /// if the key's delete committed but has not been unlinked yet.
    pub fn insert<'t>(&'t self, txn: &mut Transaction<'t>, key: &[u8], value: V) -> Result<(), Abort> {
        txn.ensure_active()?;
        let value = Arc::new(value);
        let guard = self.collector.enter();
        let mut attempt: u32 = 0;
        loop {
            let node = self.find_or_create_path(txn, key, &guard);
            match self.handle_leaf(txn, node, key, &value, &guard)? {
                Step::Done(()) => return Ok(()),
                Step::Retry => {
                    self.config.backoff.pause(attempt);
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Same as [`insert`](Self::insert): create or overwrite.
    ///
    /// # Errors
    ///
    /// As for [`insert`](Self::insert).
    #[inline]
    pub fn update<'t>(&'t self, txn: &mut Transaction<'t>, key: &[u8], value: V) -> Result<(), Abort> {
        self.insert(txn, key, value)
    }

    /// Delete `key` when `txn` commits.
    ///
    /// The delete is blind: it does not validate the value it removes. A
    /// missing key registers an absent observation and is otherwise a no-op.
    ///
    /// # Errors
    ///
    /// [`ForeignInsert`](crate::AbortReason::ForeignInsert) if another open
    /// transaction inserted the key; [`Tombstone`](crate::AbortReason::Tombstone)
    /// if it is already deleted.
    pub fn remove<'t>(&'t self, txn: &mut Transaction<'t>, key: &[u8]) -> Result<(), Abort> {
        txn.ensure_active()?;
        let guard = self.collector.enter();
        loop {
            let node_ptr = match self.descend(key, &guard) {
                Descent::Missing { node, version } => {
                    self.observe_absent(txn, node, version);
                    return Ok(());
                }
                Descent::Reached { node, .. } => node,
            };

            // SAFETY: loaded from the tree under `guard`.
            let node = unsafe { deref(node_ptr, &guard) };
            let lock = node.version.lock_guard(OwnerTag::ANONYMOUS, self.config.backoff);
            if lock.is_invalid() {
                continue;
            }
            let record_ptr = node.record();
            let saved = lock.unlocked_value();
            drop(lock);

            if record_ptr.is_null() {
                self.observe_absent(txn, node_ptr, saved);
                return Ok(());
            }
            // SAFETY: loaded from the tree under `guard`.
            let record = unsafe { deref(record_ptr, &guard) };
            self.pin_record(txn, record_ptr);
            return record.set_deleted(self, txn, &guard);
        }
    }

    // ========================================================================
    //  Non-transactional API
    // ========================================================================

    /// Physically remove `key` right away, outside any transaction.
    ///
    /// Returns `false` for a missing key, an already deleted one, or one whose
    /// inserting transaction has not committed.
    pub fn remove_nontrans(&self, key: &[u8]) -> bool {
        let guard = self.collector.enter();
        let mut attempt: u32 = 0;
        loop {
            let node_ptr = match self.descend(key, &guard) {
                Descent::Missing { .. } => return false,
                Descent::Reached { node, .. } => node,
            };

            // SAFETY: loaded from the tree under `guard`.
            let node = unsafe { deref(node_ptr, &guard) };
            let lock = node.version.lock_guard(OwnerTag::ANONYMOUS, self.config.backoff);
            if lock.is_invalid() {
                continue;
            }
            let record_ptr = node.record();
            if record_ptr.is_null() {
                return false;
            }
            // SAFETY: loaded from the tree under `guard`.
            let record = unsafe { deref(record_ptr, &guard) };

            // Never wait on a record lock while holding a node lock:
            // committers hold record locks while validating node versions.
            if !record.version.try_lock(OwnerTag::ANONYMOUS) {
                drop(lock);
                self.config.backoff.pause(attempt);
                attempt = attempt.saturating_add(1);
                continue;
            }
            if record.version.is_user() || record.is_deleted() {
                record.version.unlock();
                return false;
            }
            record.mark_deleted();
            record
                .version
                .set_version_unlock(version::next_commit_tid() | NONOPAQUE_BIT);

            node.set_record(std::ptr::null_mut());
            lock.bump_version();
            drop(lock);

            // SAFETY: unlinked above; readers that still hold it are covered
            // by their guards, transactions by their pins.
            unsafe { guard.defer_retire(record_ptr, reclaim_arc::<Record<V>>) };
            stats::record_excision();
            trace_log!(key_len = key.len(), "record removed outside a transaction");
            return true;
        }
    }

    // ========================================================================
    //  Traversal
    // ========================================================================

    /// Read-only descent along `key`.
    fn descend(&self, key: &[u8], guard: &LocalGuard<'_>) -> Descent<V> {
        let mut attempt: u32 = 0;
        'restart: loop {
            let mut node_ptr = self.root_ptr();
            let mut depth = 0;
            loop {
                // SAFETY: reachable from the root under `guard`.
                let node = unsafe { deref(node_ptr, guard) };
                let version = node.version.stable();
                if version::is_invalid(version) {
                    self.config.backoff.pause(attempt);
                    attempt = attempt.saturating_add(1);
                    continue 'restart;
                }
                let Some(&byte) = key.get(depth) else {
                    return Descent::Reached { node: node_ptr, version };
                };
                let child = node.find_child(byte);
                if node.version.value() != version {
                    continue;
                }
                if child.is_null() {
                    return Descent::Missing { node: node_ptr, version };
                }
                node_ptr = child;
                depth += 1;
            }
        }
    }

    /// Follow `path` from the root without validation.
    ///
    /// Children are never unlinked, so the path exists once created; the
    /// node reached may be stale and callers check its invalid bit under
    /// its lock.
    pub(super) fn walk(&self, path: &[u8], guard: &LocalGuard<'_>) -> Option<*mut TrieNode<V>> {
        let mut node_ptr = self.root_ptr();
        for &byte in path {
            // SAFETY: reachable from the root under `guard`.
            let node = unsafe { deref(node_ptr, guard) };
            node_ptr = node.find_child(byte);
            if node_ptr.is_null() {
                return None;
            }
        }
        Some(node_ptr)
    }

    /// Descend along `key`, creating missing nodes. Returns the node where
    /// the key ends.
    fn find_or_create_path<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        key: &[u8],
        guard: &LocalGuard<'_>,
    ) -> *mut TrieNode<V> {
        let mut attempt: u32 = 0;
        'restart: loop {
            let mut node_ptr = self.root_ptr();
            let mut depth = 0;
            while let Some(&byte) = key.get(depth) {
                // SAFETY: reachable from the root under `guard`.
                let node = unsafe { deref(node_ptr, guard) };
                if node.version.is_invalid() {
                    self.config.backoff.pause(attempt);
                    attempt = attempt.saturating_add(1);
                    continue 'restart;
                }
                let mut child = node.find_child(byte);
                if child.is_null() {
                    match self.find_or_create_child(txn, node_ptr, byte, &key[..depth], guard) {
                        Step::Done(created) => child = created,
                        Step::Retry => continue 'restart,
                    }
                }
                node_ptr = child;
                depth += 1;
            }
            return node_ptr;
        }
    }

    /// Locked half of child creation. `path` is the key prefix leading to
    /// `node_ptr`.
    fn find_or_create_child<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        node_ptr: *mut TrieNode<V>,
        byte: u8,
        path: &[u8],
        guard: &LocalGuard<'_>,
    ) -> Step<*mut TrieNode<V>> {
        // SAFETY: reachable from the root under `guard`.
        let node = unsafe { deref(node_ptr, guard) };
        let lock = node.version.lock_guard(OwnerTag::ANONYMOUS, self.config.backoff);
        if lock.is_invalid() {
            return Step::Retry;
        }
        let raced = node.find_child(byte);
        if !raced.is_null() {
            return Step::Done(raced);
        }
        if node.is_full() {
            self.grow_and_splice(txn, node_ptr, lock, path, guard);
            return Step::Retry;
        }

        let saved = lock.unlocked_value();
        let child = Arc::into_raw(Arc::new(TrieNode::new(NodeKind::Node4))).cast_mut();
        node.add_child(byte, child);
        lock.bump_version();
        drop(lock);
        self.refresh_absent(txn, node_ptr, saved, saved + INCREMENT);
        Step::Done(child)
    }

    // ========================================================================
    //  Records
    // ========================================================================

    /// Write at the node where the key ends: update the existing record or
    /// create a hidden one.
    fn handle_leaf<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        node_ptr: *mut TrieNode<V>,
        key: &[u8],
        value: &Arc<V>,
        guard: &LocalGuard<'_>,
    ) -> Result<Step<()>, Abort> {
        // SAFETY: reachable from the root under `guard`.
        let node = unsafe { deref(node_ptr, guard) };
        let existing = node.record();
        if !existing.is_null() {
            self.write_existing(txn, existing, Arc::clone(value), guard)?;
            return Ok(Step::Done(()));
        }

        let lock = node.version.lock_guard(OwnerTag::ANONYMOUS, self.config.backoff);
        if lock.is_invalid() {
            return Ok(Step::Retry);
        }
        let existing = node.record();
        if !existing.is_null() {
            // Aborting excises our own inserts, which takes node locks.
            drop(lock);
            self.write_existing(txn, existing, Arc::clone(value), guard)?;
            return Ok(Step::Done(()));
        }
        if node.is_full() {
            self.grow_and_splice(txn, node_ptr, lock, key, guard);
            return Ok(Step::Retry);
        }

        let record = Arc::new(Record::new_inserted(key, Arc::clone(value)));
        let saved = lock.unlocked_value();
        node.set_record(Arc::into_raw(Arc::clone(&record)).cast_mut());
        lock.bump_version();
        drop(lock);
        self.refresh_absent(txn, node_ptr, saved, saved + INCREMENT);

        let item = txn.item(self, record.item_key());
        item.add_flags(INSERTED_BIT);
        item.add_write(Arc::clone(value));
        let pin: Arc<dyn Any + Send + Sync> = record;
        item.pin_with(|| pin);
        Ok(Step::Done(()))
    }

    fn write_existing<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        record_ptr: *mut Record<V>,
        value: Arc<V>,
        guard: &LocalGuard<'_>,
    ) -> Result<(), Abort> {
        // SAFETY: loaded from the tree under `guard`.
        let record = unsafe { deref(record_ptr, guard) };
        let item = self.pin_record(txn, record_ptr);
        if item.has_flags(DELETE_BIT) && !record.is_deleted() {
            record.set_undeleted(item);
        }
        record.update(self, txn, value)
    }

    fn read_record<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        record_ptr: *mut Record<V>,
        guard: &LocalGuard<'_>,
    ) -> Result<Option<Arc<V>>, Abort> {
        // SAFETY: loaded from the tree under `guard`.
        let record = unsafe { deref(record_ptr, guard) };
        if self.pin_record(txn, record_ptr).has_flags(DELETE_BIT) {
            return Ok(None);
        }
        let value = record.read(self, txn, guard)?;
        if record.is_deleted() {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Item for `record_ptr`, holding a pin on the record.
    fn pin_record<'t, 'x>(
        &'t self,
        txn: &'x mut Transaction<'t>,
        record_ptr: *mut Record<V>,
    ) -> &'x mut crate::item::TransItem<'t> {
        let key = ItemKey::Record(record_ptr.addr());
        let item = txn.item(self, key);
        // SAFETY: the caller loaded `record_ptr` under a guard it still holds.
        item.pin_with(|| unsafe { pin_arc(record_ptr.cast_const()) });
        item
    }

    // ========================================================================
    //  Absent observations
    // ========================================================================

    /// Stamp "nothing below here for this key" with `version`.
    fn observe_absent<'t>(&'t self, txn: &mut Transaction<'t>, node_ptr: *mut TrieNode<V>, version: u64) {
        let item = txn.item(self, ItemKey::PathSentinel(node_ptr.addr()));
        // SAFETY: the caller loaded `node_ptr` under a guard it still holds.
        item.pin_with(|| unsafe { pin_arc(node_ptr.cast_const()) });
        item.observe(version);
    }

    /// Move this transaction's own absent observation of `node_ptr` from
    /// `old` to `new` after it changed the node itself.
    fn refresh_absent(&self, txn: &mut Transaction<'_>, node_ptr: *mut TrieNode<V>, old: u64, new: u64) -> bool {
        txn.find_item_mut(self, ItemKey::PathSentinel(node_ptr.addr()))
            .is_some_and(|item| item.update_read(old, new))
    }

    // ========================================================================
    //  Growth
    // ========================================================================

    /// Replace the full node at `path` with the next larger kind.
    ///
    /// `lock` is the full node's lock. The node is marked grown, the copy is
    /// spliced into the parent, and only then is the lock released and the
    /// old node retired.
    fn grow_and_splice<'t>(
        &'t self,
        txn: &mut Transaction<'t>,
        node_ptr: *mut TrieNode<V>,
        lock: VersionGuard<'_>,
        path: &[u8],
        guard: &LocalGuard<'_>,
    ) {
        // SAFETY: reachable from the root under `guard`; we hold its lock.
        let node = unsafe { deref(node_ptr, guard) };
        let saved = lock.unlocked_value();
        let grown = node.grow();
        debug_log!(from = ?node.kind(), to = ?grown.kind(), depth = path.len(), "node grown");
        let bigger = Arc::into_raw(Arc::new(grown)).cast_mut();
        lock.mark_grown();

        // Our own absent observation moves to the replacement, which starts
        // at version zero.
        if self.refresh_absent(txn, node_ptr, saved, saved | INVALID_BIT | MUST_GROW_BIT) {
            self.observe_absent(txn, bigger, 0);
        }

        self.splice(path, node_ptr, bigger, guard);
        drop(lock);
        stats::record_grow();

        // SAFETY: no longer reachable from the parent; readers still on it
        // see the invalid bit and restart. Its entries now belong to `bigger`.
        unsafe { guard.defer_retire(node_ptr, reclaim_arc::<TrieNode<V>>) };
    }

    /// Swap `old` for `new` in the node at `path[..len - 1]`.
    fn splice(&self, path: &[u8], old: *mut TrieNode<V>, new: *mut TrieNode<V>, guard: &LocalGuard<'_>) {
        let Some((&byte, parent_path)) = path.split_last() else {
            unreachable!("the root never grows");
        };
        let mut attempt: u32 = 0;
        loop {
            if let Some(parent_ptr) = self.walk(parent_path, guard) {
                // SAFETY: reachable from the root under `guard`.
                let parent = unsafe { deref(parent_ptr, guard) };
                let lock = parent.version.lock_guard(OwnerTag::ANONYMOUS, self.config.backoff);
                if !lock.is_invalid() && parent.replace_child(byte, old, new) {
                    return;
                }
            }
            warn_log!(depth = path.len(), attempt, "splice parent went stale, walking again");
            self.config.backoff.pause(attempt);
            attempt = attempt.saturating_add(1);
        }
    }
}
