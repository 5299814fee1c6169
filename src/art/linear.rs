//! Filepath: src/art/linear.rs
//!
//! Small nodes: parallel `(byte, child)` arrays scanned linearly.
//!
//! Entries are append-only. A writer stores the byte and child of slot `n`
//! and then publishes them by storing `count = n + 1` with `Release`; readers
//! load `count` with `Acquire` and only look at slots below it.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use super::node::TrieNode;

/// Node with up to `N` children, `N <= 255`.
pub(crate) struct LinearNode<V, const N: usize> {
    keys: [AtomicU8; N],
    children: [AtomicPtr<TrieNode<V>>; N],
    count: AtomicU8,
}

/// Four-way node.
pub(crate) type Node4<V> = LinearNode<V, 4>;

/// Sixteen-way node.
pub(crate) type Node16<V> = LinearNode<V, 16>;

impl<V, const N: usize> LinearNode<V, N> {
    pub(crate) const fn new() -> Self {
        Self {
            keys: [const { AtomicU8::new(0) }; N],
            children: [const { AtomicPtr::new(ptr::null_mut()) }; N],
            count: AtomicU8::new(0),
        }
    }

    /// Published children.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::Acquire) as usize
    }

    #[inline]
    pub(crate) fn find_child(&self, byte: u8) -> *mut TrieNode<V> {
        let n = self.len();
        for i in 0..n {
            if self.keys[i].load(Ordering::Relaxed) == byte {
                return self.children[i].load(Ordering::Acquire);
            }
        }
        ptr::null_mut()
    }

    /// Append a child. Caller holds the node lock (or owns the node).
    pub(crate) fn add_child(&self, byte: u8, child: *mut TrieNode<V>) {
        let n = self.len();
        debug_assert!(n < N, "add_child on a full node");
        debug_assert!(self.find_child(byte).is_null(), "duplicate child byte");
        self.keys[n].store(byte, Ordering::Relaxed);
        self.children[n].store(child, Ordering::Release);
        #[expect(clippy::cast_possible_truncation, reason = "N <= 255")]
        self.count.store((n + 1) as u8, Ordering::Release);
    }

    /// Swap the child under `byte` from `old` to `new`.
    pub(crate) fn replace_child(&self, byte: u8, old: *mut TrieNode<V>, new: *mut TrieNode<V>) -> bool {
        let n = self.len();
        for i in 0..n {
            if self.keys[i].load(Ordering::Relaxed) == byte {
                return self.children[i]
                    .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
            }
        }
        false
    }

    pub(crate) fn for_each_child(&self, mut f: impl FnMut(u8, *mut TrieNode<V>)) {
        for i in 0..self.len() {
            f(
                self.keys[i].load(Ordering::Relaxed),
                self.children[i].load(Ordering::Acquire),
            );
        }
    }
}
