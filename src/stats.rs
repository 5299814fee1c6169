//! Filepath: src/stats.rs
//!
//! Process-wide counters. Relaxed atomics; totals are approximate while
//! transactions are running.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AbortReason;

static COMMITS: AtomicU64 = AtomicU64::new(0);
static ABORTS: [AtomicU64; AbortReason::COUNT] = [const { AtomicU64::new(0) }; AbortReason::COUNT];
static NODE_GROWS: AtomicU64 = AtomicU64::new(0);
static RECORD_EXCISIONS: AtomicU64 = AtomicU64::new(0);

#[inline]
pub(crate) fn record_commit() {
    COMMITS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_abort(reason: AbortReason) {
    ABORTS[reason.index()].fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_grow() {
    NODE_GROWS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_excision() {
    RECORD_EXCISIONS.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Committed transactions.
    pub commits: u64,
    /// Aborts, indexed like [`AbortReason::ALL`].
    pub aborts: [u64; AbortReason::COUNT],
    /// Trie node growths.
    pub node_grows: u64,
    /// Records physically unlinked from the trie.
    pub record_excisions: u64,
}

impl StatsSnapshot {
    /// Aborts for one reason.
    #[must_use]
    pub const fn aborts_for(&self, reason: AbortReason) -> u64 {
        self.aborts[reason.index()]
    }

    /// Aborts for every reason combined.
    #[must_use]
    pub fn total_aborts(&self) -> u64 {
        self.aborts.iter().sum()
    }
}

/// Read all counters.
#[must_use]
pub fn snapshot() -> StatsSnapshot {
    let mut aborts = [0; AbortReason::COUNT];
    for (out, counter) in aborts.iter_mut().zip(ABORTS.iter()) {
        *out = counter.load(Ordering::Relaxed);
    }
    StatsSnapshot {
        commits: COMMITS.load(Ordering::Relaxed),
        aborts,
        node_grows: NODE_GROWS.load(Ordering::Relaxed),
        record_excisions: RECORD_EXCISIONS.load(Ordering::Relaxed),
    }
}
