//! Filepath: src/art/node.rs
//!
//! [`TrieNode`]: one level of byte fan-out.
//!
//! A node has its own [`VersionWord`], a dedicated record slot for the key
//! that ends exactly here, and a body that maps the next key byte to a child.
//! The body is a closed enum over the four capacities; the record slot is kept
//! apart from the byte map so a key containing `0x00` never collides with a
//! key that stops at this node.
//!
//! All mutation happens under the node's lock. Children are append-only;
//! the only in-place change to an existing child slot is the splice that
//! swaps a grown child for its replacement.

use std::fmt as StdFmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use super::linear::{LinearNode, Node4, Node16};
use super::node48::{NODE48_CAPACITY, Node48};
use super::node256::Node256;
use super::record::Record;
use crate::version::VersionWord;

/// Node capacity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    /// Up to 4 entries.
    Node4,
    /// Up to 16 entries.
    Node16,
    /// Up to 48 entries.
    Node48,
    /// One slot per byte value.
    Node256,
}

impl NodeKind {
    /// Entries (children plus the record) the node holds before it must grow.
    #[must_use]
    pub const fn capacity(self) -> usize {
        match self {
            Self::Node4 => 4,
            Self::Node16 => 16,
            Self::Node48 => NODE48_CAPACITY,
            Self::Node256 => 256,
        }
    }

    /// Next larger class, `None` for [`NodeKind::Node256`].
    #[must_use]
    pub const fn grown(self) -> Option<Self> {
        match self {
            Self::Node4 => Some(Self::Node16),
            Self::Node16 => Some(Self::Node48),
            Self::Node48 => Some(Self::Node256),
            Self::Node256 => None,
        }
    }
}

pub(crate) enum NodeBody<V> {
    Node4(Node4<V>),
    Node16(Node16<V>),
    Node48(Box<Node48<V>>),
    Node256(Box<Node256<V>>),
}

macro_rules! dispatch {
    ($body:expr, $node:ident => $e:expr) => {
        match $body {
            NodeBody::Node4($node) => $e,
            NodeBody::Node16($node) => $e,
            NodeBody::Node48($node) => $e,
            NodeBody::Node256($node) => $e,
        }
    };
}

/// A trie node.
pub(crate) struct TrieNode<V> {
    pub(crate) version: VersionWord,
    record: AtomicPtr<Record<V>>,
    body: NodeBody<V>,
}

impl<V> StdFmt::Debug for TrieNode<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("TrieNode")
            .field("kind", &self.kind())
            .field("children", &self.child_count())
            .field("has_record", &!self.record().is_null())
            .field("version", &self.version)
            .finish()
    }
}

impl<V> TrieNode<V> {
    pub(crate) fn new(kind: NodeKind) -> Self {
        let body = match kind {
            NodeKind::Node4 => NodeBody::Node4(LinearNode::new()),
            NodeKind::Node16 => NodeBody::Node16(LinearNode::new()),
            NodeKind::Node48 => NodeBody::Node48(Box::new(Node48::new())),
            NodeKind::Node256 => NodeBody::Node256(Box::new(Node256::new())),
        };
        Self {
            version: VersionWord::new(0),
            record: AtomicPtr::new(ptr::null_mut()),
            body,
        }
    }

    #[inline]
    pub(crate) const fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Node4(_) => NodeKind::Node4,
            NodeBody::Node16(_) => NodeKind::Node16,
            NodeBody::Node48(_) => NodeKind::Node48,
            NodeBody::Node256(_) => NodeKind::Node256,
        }
    }

    // ========================================================================
    //  Record slot
    // ========================================================================

    /// Record ending at this node, or null.
    #[inline]
    pub(crate) fn record(&self) -> *mut Record<V> {
        self.record.load(Ordering::Acquire)
    }

    /// Store the record slot. Caller holds the lock.
    #[inline]
    pub(crate) fn set_record(&self, record: *mut Record<V>) {
        debug_assert!(self.version.is_locked(), "set_record() without the lock");
        self.record.store(record, Ordering::Release);
    }

    // ========================================================================
    //  Children
    // ========================================================================

    #[inline]
    pub(crate) fn find_child(&self, byte: u8) -> *mut TrieNode<V> {
        dispatch!(&self.body, n => n.find_child(byte))
    }

    pub(crate) fn child_count(&self) -> usize {
        dispatch!(&self.body, n => n.len())
    }

    /// Children plus the record, if any.
    pub(crate) fn occupancy(&self) -> usize {
        self.child_count() + usize::from(!self.record().is_null())
    }

    /// Whether another entry would overflow this node.
    pub(crate) fn is_full(&self) -> bool {
        match self.body {
            NodeBody::Node256(_) => false,
            _ => self.occupancy() >= self.kind().capacity(),
        }
    }

    /// Add a child. Caller holds the lock or exclusively owns the node.
    pub(crate) fn add_child(&self, byte: u8, child: *mut TrieNode<V>) {
        debug_assert!(!self.is_full(), "add_child() on a full node");
        dispatch!(&self.body, n => n.add_child(byte, child));
    }

    /// Swap `old` for `new` under `byte`. Caller holds the lock.
    pub(crate) fn replace_child(&self, byte: u8, old: *mut TrieNode<V>, new: *mut TrieNode<V>) -> bool {
        debug_assert!(self.version.is_locked(), "replace_child() without the lock");
        dispatch!(&self.body, n => n.replace_child(byte, old, new))
    }

    pub(crate) fn for_each_child(&self, f: impl FnMut(u8, *mut TrieNode<V>)) {
        dispatch!(&self.body, n => n.for_each_child(f));
    }

    /// Build the next larger node holding every entry of this one.
    ///
    /// Caller holds the lock so the entries cannot change underneath. The
    /// pointers move to the new node; this node must not release them.
    ///
    /// # Panics
    /// On a [`NodeKind::Node256`], which cannot grow.
    pub(crate) fn grow(&self) -> Self {
        let Some(kind) = self.kind().grown() else {
            unreachable!("Node256 cannot grow");
        };
        let bigger = Self::new(kind);
        self.for_each_child(|byte, child| bigger.add_child(byte, child));
        bigger.record.store(self.record(), Ordering::Relaxed);
        bigger
    }
}
