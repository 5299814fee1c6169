//! Filepath: src/art/reclaim.rs
//!
//! Reclaim helpers for seize-based memory reclamation.
//!
//! Every node, record and value is an `Arc` published as a raw pointer. The
//! tree owns one strong count per published pointer; transaction items add
//! their own counts through [`pin_arc`]. Unlinking a pointer retires the
//! tree's count with [`reclaim_arc`] once no guard can still see it.

use std::any::Any;
use std::sync::Arc;

use seize::Collector;

use super::node::TrieNode;

// ============================================================================
//  Single-Pointer Reclaimers (seize callback signatures)
// ============================================================================

/// Release the tree's strong count on an unlinked `Arc` (seize callback).
///
/// # Safety
///
/// - `ptr` must come from `Arc::into_raw` and carry one count owned by the
///   retiring structure.
/// - Must only be called after seize determines no reader can reach it.
pub(crate) unsafe fn reclaim_arc<T>(ptr: *mut T, _collector: &Collector) {
    // SAFETY: Caller guarantees ptr came from Arc::into_raw and that seize
    // has no remaining readers.
    unsafe { drop(Arc::from_raw(ptr.cast_const())) };
}

/// Take a new strong count on a published pointer, erased for an item pin.
///
/// # Safety
///
/// - `ptr` must come from `Arc::into_raw` (or `Arc::as_ptr`) on an `Arc` that
///   is still alive, which holding a seize guard across the load guarantees.
pub(crate) unsafe fn pin_arc<T: Send + Sync + 'static>(ptr: *const T) -> Arc<dyn Any + Send + Sync> {
    // SAFETY: Caller guarantees the allocation is alive.
    let pinned: Arc<T> = unsafe {
        Arc::increment_strong_count(ptr);
        Arc::from_raw(ptr)
    };
    pinned
}

// ============================================================================
//  Teardown
// ============================================================================

/// Release every node and record reachable below `root`, plus `root`'s own
/// record. `root` itself stays with its owner.
///
/// # Safety
///
/// - No other thread may access the tree.
/// - Every child and record pointer below `root` must carry the one strong
///   count the tree owns.
pub(crate) unsafe fn teardown<V>(root: &TrieNode<V>) {
    let mut stack: Vec<*mut TrieNode<V>> = Vec::with_capacity(64);
    release_record(root);
    root.for_each_child(|_, child| stack.push(child));

    while let Some(ptr) = stack.pop() {
        // SAFETY: pointers in the tree came from Arc::into_raw and are
        // released exactly once here.
        let node = unsafe { Arc::from_raw(ptr.cast_const()) };
        release_record(&node);
        node.for_each_child(|_, child| stack.push(child));
    }
}

fn release_record<V>(node: &TrieNode<V>) {
    let record = node.record();
    if !record.is_null() {
        // SAFETY: the record slot holds the tree's count from Arc::into_raw.
        unsafe { drop(Arc::from_raw(record.cast_const())) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::art::node::NodeKind;

    #[test]
    fn test_reclaim_arc_drops_one_count() {
        let collector = Collector::new();
        let value = Arc::new(7_u32);
        let raw = Arc::into_raw(Arc::clone(&value)).cast_mut();
        assert_eq!(Arc::strong_count(&value), 2);
        // SAFETY: raw carries exactly one count.
        unsafe { reclaim_arc(raw, &collector) };
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn test_pin_keeps_referent_alive() {
        let value = Arc::new(String::from("pinned"));
        // SAFETY: value is alive for the call.
        let pin = unsafe { pin_arc(Arc::as_ptr(&value)) };
        drop(value);
        assert_eq!(pin.downcast_ref::<String>().map(String::as_str), Some("pinned"));
    }

    #[test]
    fn test_teardown_releases_children() {
        let root: TrieNode<u32> = TrieNode::new(NodeKind::Node256);
        let child = Arc::new(TrieNode::<u32>::new(NodeKind::Node4));
        let probe = Arc::clone(&child);
        root.add_child(b'x', Arc::into_raw(child).cast_mut());
        assert_eq!(Arc::strong_count(&probe), 2);
        // SAFETY: single-threaded; the child carries the tree's count.
        unsafe { teardown(&root) };
        assert_eq!(Arc::strong_count(&probe), 1);
    }
}
