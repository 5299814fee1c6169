//! Filepath: src/art.rs
//! `ArtTree` - a transactional adaptive radix tree.
//!
//! Keys are arbitrary byte strings, consumed one byte per level. Every node
//! carries a [`VersionWord`](crate::version::VersionWord) used both as its
//! lock and as the version that "key absent" observations are stamped with.
//! Values live in records hanging off the node where their key ends.
//!
//! The tree is a [`Participant`]: transactional reads and writes register
//! items against it, and the commit driver calls back into it to lock,
//! validate and install them.

use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;

use seize::{Collector, Guard};

use crate::config::StoConfig;
use crate::item::{ItemKey, LOCKED_BIT, TransItem};
use crate::participant::Participant;
use crate::stats;
use crate::tracing_helpers::trace_log;
use crate::transaction::TxnInfo;
use crate::version::OwnerTag;

mod linear;
mod node;
mod node256;
mod node48;
mod ops;
mod reclaim;
mod record;

pub use node::NodeKind;

use node::TrieNode;
use reclaim::reclaim_arc;
use record::{DELETE_BIT, INSERTED_BIT, Record};

// ============================================================================
//  NodeCensus
// ============================================================================

/// Node and record counts reachable from the root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCensus {
    /// `Node4` nodes.
    pub node4: usize,
    /// `Node16` nodes.
    pub node16: usize,
    /// `Node48` nodes.
    pub node48: usize,
    /// `Node256` nodes, the root included.
    pub node256: usize,
    /// Committed, not deleted records.
    pub records: usize,
}

impl NodeCensus {
    /// Total nodes.
    #[must_use]
    pub const fn nodes(&self) -> usize {
        self.node4 + self.node16 + self.node48 + self.node256
    }

    /// Count for one node kind.
    #[must_use]
    pub const fn of(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Node4 => self.node4,
            NodeKind::Node16 => self.node16,
            NodeKind::Node48 => self.node48,
            NodeKind::Node256 => self.node256,
        }
    }

    const fn count(&mut self, kind: NodeKind) {
        match kind {
            NodeKind::Node4 => self.node4 += 1,
            NodeKind::Node16 => self.node16 += 1,
            NodeKind::Node48 => self.node48 += 1,
            NodeKind::Node256 => self.node256 += 1,
        }
    }
}

// ============================================================================
//  ArtTree
// ============================================================================

/// A transactional adaptive radix tree mapping byte strings to `Arc<V>`.
///
/// The root is always a `Node256`. Nodes below it start as `Node4` and grow
/// through `Node16` and `Node48` to `Node256` as children are added; they
/// never shrink.
///
/// # Example
///
/// ```rust
/// use sto::{ArtTree, Transaction};
///
/// let tree: ArtTree<&str> = ArtTree::new();
///
/// let mut txn = Transaction::new();
/// tree.insert(&mut txn, b"e\0ight\0", "long")?;
/// tree.insert(&mut txn, b"e", "short")?;
/// txn.commit()?;
///
/// let mut txn = Transaction::new();
/// assert_eq!(tree.lookup(&mut txn, b"e")?.as_deref(), Some(&"short"));
/// assert_eq!(tree.lookup(&mut txn, b"e\0ight")?, None);
/// txn.commit()?;
/// # Ok::<(), sto::Abort>(())
/// ```
pub struct ArtTree<V> {
    root: Arc<TrieNode<V>>,
    collector: Collector,
    config: StoConfig,
    _marker: PhantomData<Arc<V>>,
}

impl<V> StdFmt::Debug for ArtTree<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("ArtTree")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<V: Send + Sync + 'static> Default for ArtTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for ArtTree<V> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` excludes every reader and transaction (items
        // borrow the tree), and each published pointer carries one count.
        unsafe { reclaim::teardown(&self.root) };
    }
}

impl<V: Send + Sync + 'static> ArtTree<V> {
    /// Empty tree with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoConfig::default())
    }

    /// Empty tree. `config.backoff` paces structural lock spinning.
    #[must_use]
    pub fn with_config(config: StoConfig) -> Self {
        Self {
            root: Arc::new(TrieNode::new(NodeKind::Node256)),
            collector: Collector::new(),
            config,
            _marker: PhantomData,
        }
    }

    /// Configuration in effect.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &StoConfig {
        &self.config
    }

    #[inline]
    fn root_ptr(&self) -> *mut TrieNode<V> {
        Arc::as_ptr(&self.root).cast_mut()
    }

    /// Count nodes by kind and visible records.
    ///
    /// Not transactional: concurrent writers may or may not be counted.
    #[must_use]
    pub fn census(&self) -> NodeCensus {
        let guard = self.collector.enter();
        let mut census = NodeCensus::default();
        let mut stack = vec![self.root_ptr()];
        while let Some(ptr) = stack.pop() {
            // SAFETY: reachable from the root while `guard` is held.
            let node = unsafe { ops::deref(ptr, &guard) };
            census.count(node.kind());
            let record = node.record();
            if !record.is_null() {
                // SAFETY: as above.
                let record = unsafe { ops::deref(record, &guard) };
                if !record.is_deleted() && !record.version.is_user() {
                    census.records += 1;
                }
            }
            node.for_each_child(|_, child| stack.push(child));
        }
        census
    }

    /// Unlink a record whose removal is final: a committed delete, or an
    /// insert whose transaction aborted.
    fn excise(&self, record: &Record<V>) {
        let guard = self.collector.enter();
        let target = ptr::from_ref(record).cast_mut();
        let mut attempt: u32 = 0;
        loop {
            let Some(node_ptr) = self.walk(record.key(), &guard) else {
                return;
            };
            // SAFETY: reachable from the root while `guard` is held.
            let node = unsafe { ops::deref(node_ptr, &guard) };
            let lock = node.version.lock_guard(OwnerTag::ANONYMOUS, self.config.backoff);
            if lock.is_invalid() {
                drop(lock);
                self.config.backoff.pause(attempt);
                attempt = attempt.saturating_add(1);
                continue;
            }
            if node.record() != target {
                return;
            }
            node.set_record(ptr::null_mut());
            lock.bump_version();
            drop(lock);

            // SAFETY: unlinked above; the slot's count is released once no
            // guard can still reach it. Item pins hold their own counts.
            unsafe { guard.defer_retire(target, reclaim_arc::<Record<V>>) };
            stats::record_excision();
            trace_log!(key_len = record.key().len(), "record excised");
            return;
        }
    }
}

// ============================================================================
//  Participant
// ============================================================================

impl<V: Send + Sync + 'static> Participant for ArtTree<V> {
    fn lock(&self, item: &mut TransItem<'_>, txn: &TxnInfo) -> bool {
        let item: &TransItem<'_> = item;
        match item.key() {
            ItemKey::Record(_) => item
                .pinned::<Record<V>>()
                .is_some_and(|record| record.lock_for_commit(item, txn)),
            ItemKey::PathSentinel(_) => true,
        }
    }

    fn check(&self, item: &TransItem<'_>, txn: &TxnInfo) -> bool {
        match item.key() {
            ItemKey::Record(_) => item
                .pinned::<Record<V>>()
                .is_some_and(|record| record.check(item, txn)),
            ItemKey::PathSentinel(_) => item
                .pinned::<TrieNode<V>>()
                .is_some_and(|node| node.version.stable() == item.read_version()),
        }
    }

    fn install(&self, item: &mut TransItem<'_>, txn: &TxnInfo) {
        let ItemKey::Record(_) = item.key() else {
            return;
        };
        let delete = item.has_flags(DELETE_BIT);
        let value = if delete { None } else { item.take_write_value::<V>() };
        if let Some(record) = item.pinned::<Record<V>>() {
            let guard = self.collector.enter();
            record.install(delete, value, txn, &guard);
        }
        item.clear_flags(LOCKED_BIT);
    }

    fn unlock(&self, item: &mut TransItem<'_>) {
        if let Some(record) = item.pinned::<Record<V>>() {
            record.version.unlock();
        }
    }

    fn cleanup(&self, item: &mut TransItem<'_>, committed: bool) {
        let ItemKey::Record(_) = item.key() else {
            return;
        };
        let unlink = if committed {
            item.has_flags(DELETE_BIT)
        } else {
            item.has_flags(INSERTED_BIT)
        };
        if unlink && let Some(record) = item.pinned::<Record<V>>() {
            self.excise(record);
        }
        item.clear_flags(DELETE_BIT | INSERTED_BIT);
    }
}
