//! Filepath: src/art/node256.rs
//!
//! 256-way node: one child slot per byte. Never full, never grows.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU16, Ordering};

use super::node::TrieNode;

pub(crate) struct Node256<V> {
    children: [AtomicPtr<TrieNode<V>>; 256],
    count: AtomicU16,
}

impl<V> Node256<V> {
    pub(crate) const fn new() -> Self {
        Self {
            children: [const { AtomicPtr::new(ptr::null_mut()) }; 256],
            count: AtomicU16::new(0),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        usize::from(self.count.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn find_child(&self, byte: u8) -> *mut TrieNode<V> {
        self.children[usize::from(byte)].load(Ordering::Acquire)
    }

    pub(crate) fn add_child(&self, byte: u8, child: *mut TrieNode<V>) {
        let slot = &self.children[usize::from(byte)];
        debug_assert!(slot.load(Ordering::Relaxed).is_null(), "duplicate child byte");
        slot.store(child, Ordering::Release);
        self.count.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn replace_child(&self, byte: u8, old: *mut TrieNode<V>, new: *mut TrieNode<V>) -> bool {
        self.children[usize::from(byte)]
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn for_each_child(&self, mut f: impl FnMut(u8, *mut TrieNode<V>)) {
        for byte in 0..=u8::MAX {
            let child = self.find_child(byte);
            if !child.is_null() {
                f(byte, child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_byte_has_a_slot() {
        let node: Node256<()> = Node256::new();
        for b in 0..=u8::MAX {
            node.add_child(b, ptr::without_provenance_mut(usize::from(b) * 64 + 64));
        }
        assert_eq!(node.len(), 256);
        let mut n = 0;
        node.for_each_child(|b, c| {
            assert_eq!(c.addr(), usize::from(b) * 64 + 64);
            n += 1;
        });
        assert_eq!(n, 256);
    }

    #[test]
    fn test_replace_null_slot_fails() {
        let node: Node256<()> = Node256::new();
        assert!(!node.replace_child(1, ptr::without_provenance_mut(64), ptr::null_mut()));
    }
}
