//! Filepath: src/art/node48.rs
//!
//! 48-way node: a 256-entry byte index into a dense child array.
//!
//! `index[byte] == 0` means no child; otherwise the child lives in
//! `children[index[byte] - 1]`. The child pointer is stored before the index
//! entry is published.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use super::node::TrieNode;

pub(crate) const NODE48_CAPACITY: usize = 48;

pub(crate) struct Node48<V> {
    index: [AtomicU8; 256],
    children: [AtomicPtr<TrieNode<V>>; NODE48_CAPACITY],
    count: AtomicU8,
}

impl<V> Node48<V> {
    pub(crate) const fn new() -> Self {
        Self {
            index: [const { AtomicU8::new(0) }; 256],
            children: [const { AtomicPtr::new(ptr::null_mut()) }; NODE48_CAPACITY],
            count: AtomicU8::new(0),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::Acquire) as usize
    }

    #[inline]
    pub(crate) fn find_child(&self, byte: u8) -> *mut TrieNode<V> {
        match self.index[usize::from(byte)].load(Ordering::Acquire) {
            0 => ptr::null_mut(),
            slot => self.children[usize::from(slot) - 1].load(Ordering::Acquire),
        }
    }

    pub(crate) fn add_child(&self, byte: u8, child: *mut TrieNode<V>) {
        let n = self.len();
        debug_assert!(n < NODE48_CAPACITY, "add_child on a full Node48");
        debug_assert!(self.find_child(byte).is_null(), "duplicate child byte");
        self.children[n].store(child, Ordering::Release);
        #[expect(clippy::cast_possible_truncation, reason = "n < 48")]
        let slot = (n + 1) as u8;
        self.index[usize::from(byte)].store(slot, Ordering::Release);
        self.count.store(slot, Ordering::Release);
    }

    pub(crate) fn replace_child(&self, byte: u8, old: *mut TrieNode<V>, new: *mut TrieNode<V>) -> bool {
        match self.index[usize::from(byte)].load(Ordering::Acquire) {
            0 => false,
            slot => self.children[usize::from(slot) - 1]
                .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
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

    fn fake(n: usize) -> *mut TrieNode<()> {
        ptr::without_provenance_mut(n * 64)
    }

    #[test]
    fn test_fill_to_capacity() {
        let node: Node48<()> = Node48::new();
        for i in 0..NODE48_CAPACITY {
            let byte = u8::try_from(i * 5).unwrap();
            node.add_child(byte, fake(i + 1));
        }
        assert_eq!(node.len(), NODE48_CAPACITY);
        for i in 0..NODE48_CAPACITY {
            let byte = u8::try_from(i * 5).unwrap();
            assert_eq!(node.find_child(byte), fake(i + 1));
        }
        assert!(node.find_child(1).is_null());
    }

    #[test]
    fn test_iterates_in_byte_order() {
        let node: Node48<()> = Node48::new();
        for b in [200_u8, 0, 17] {
            node.add_child(b, fake(usize::from(b) + 1));
        }
        let mut seen = Vec::new();
        node.for_each_child(|b, _| seen.push(b));
        assert_eq!(seen, vec![0, 17, 200]);
    }

    #[test]
    fn test_replace() {
        let node: Node48<()> = Node48::new();
        node.add_child(3, fake(1));
        assert!(node.replace_child(3, fake(1), fake(2)));
        assert_eq!(node.find_child(3), fake(2));
        assert!(!node.replace_child(4, fake(2), fake(5)));
    }
}
