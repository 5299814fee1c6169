//! Filepath: src/error.rs
//!
//! Transaction abort error.

use thiserror::Error;

/// Why a transaction aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AbortReason {
    /// Touched a record inserted by another transaction that is still open.
    #[error("record was inserted by another open transaction")]
    ForeignInsert,

    /// Wrote a record whose delete has already committed.
    #[error("record is already deleted")]
    Tombstone,

    /// Commit phase 1 could not lock a write item.
    #[error("could not lock a write item at commit")]
    CommitLock,

    /// Commit phase 2 found a read that no longer holds.
    #[error("read-set validation failed")]
    Validation,

    /// The caller asked for the abort.
    #[error("aborted by caller")]
    Explicit,

    /// The transaction had already finished.
    #[error("transaction is no longer active")]
    Inactive,
}

impl AbortReason {
    pub(crate) const COUNT: usize = 6;

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::ForeignInsert => 0,
            Self::Tombstone => 1,
            Self::CommitLock => 2,
            Self::Validation => 3,
            Self::Explicit => 4,
            Self::Inactive => 5,
        }
    }

    /// All reasons, in counter order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::ForeignInsert,
        Self::Tombstone,
        Self::CommitLock,
        Self::Validation,
        Self::Explicit,
        Self::Inactive,
    ];
}

/// A transaction aborted. Its cleanup has already run; retry from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct Abort {
    txn_id: u64,
    reason: AbortReason,
}

impl Abort {
    pub(crate) const fn new(txn_id: u64, reason: AbortReason) -> Self {
        Self { txn_id, reason }
    }

    /// Why it aborted.
    #[must_use]
    pub const fn reason(&self) -> AbortReason {
        self.reason
    }

    /// Id of the aborted transaction.
    #[must_use]
    pub const fn txn_id(&self) -> u64 {
        self.txn_id
    }
}
