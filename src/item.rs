//! Filepath: src/item.rs
//!
//! Read/write-set entries.
//!
//! A [`TransItem`] is one transaction's record of what it saw and what it
//! intends to write for a single `(participant, key)` pair. The commit driver
//! only looks at the generic bits ([`READ_BIT`], [`WRITE_BIT`],
//! [`LOCKED_BIT`]); participants are free to use [`USER0_BIT`] and up for
//! their own meaning.

use std::any::Any;
use std::fmt as StdFmt;
use std::sync::Arc;

use crate::participant::Participant;

// ============================================================================
//  Flags
// ============================================================================

/// The item holds an observed version.
pub const READ_BIT: u32 = 1 << 0;

/// The item holds a pending write.
pub const WRITE_BIT: u32 = 1 << 1;

/// The participant's lock for this item is held and must be released.
pub const LOCKED_BIT: u32 = 1 << 2;

/// First participant-defined flag.
pub const USER0_BIT: u32 = 1 << 8;

/// Second participant-defined flag.
pub const USER1_BIT: u32 = 1 << 9;

/// Third participant-defined flag.
pub const USER2_BIT: u32 = 1 << 10;

// ============================================================================
//  ItemKey
// ============================================================================

/// What an item refers to inside its participant.
///
/// Ordered so the commit driver can sort write-sets into one global order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemKey {
    /// A value cell, identified by address or a participant-chosen id.
    Record(usize),
    /// A trie node carrying an "absent" observation.
    PathSentinel(usize),
}

/// Address of a participant, used as the first sort component.
#[inline]
#[must_use]
pub(crate) fn owner_addr(owner: &dyn Participant) -> usize {
    std::ptr::from_ref(owner).cast::<()>() as usize
}

// ============================================================================
//  TransItem
// ============================================================================

/// One entry in a transaction's read/write set.
pub struct TransItem<'t> {
    owner: &'t dyn Participant,
    key: ItemKey,
    flags: u32,
    read_version: u64,
    write_value: Option<Box<dyn Any + Send + Sync>>,
    pin: Option<Arc<dyn Any + Send + Sync>>,
}

impl StdFmt::Debug for TransItem<'_> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("TransItem")
            .field("owner", &owner_addr(self.owner))
            .field("key", &self.key)
            .field("flags", &format_args!("{:#x}", self.flags))
            .field("read_version", &self.read_version)
            .field("has_write_value", &self.write_value.is_some())
            .finish_non_exhaustive()
    }
}

impl<'t> TransItem<'t> {
    pub(crate) fn new(owner: &'t dyn Participant, key: ItemKey) -> Self {
        Self {
            owner,
            key,
            flags: 0,
            read_version: 0,
            write_value: None,
            pin: None,
        }
    }

    /// Participant this item belongs to.
    #[inline]
    #[must_use]
    pub fn owner(&self) -> &'t dyn Participant {
        self.owner
    }

    /// Key within the participant.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> ItemKey {
        self.key
    }

    /// Global sort key for phase-1 locking.
    #[inline]
    pub(crate) fn order_key(&self) -> (usize, ItemKey) {
        (owner_addr(self.owner), self.key)
    }

    // ========================================================================
    //  Flags
    // ========================================================================

    /// Raw flags.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    /// All of `bits` set.
    #[inline]
    #[must_use]
    pub const fn has_flags(&self, bits: u32) -> bool {
        self.flags & bits == bits
    }

    /// Set `bits`.
    #[inline]
    pub fn add_flags(&mut self, bits: u32) {
        self.flags |= bits;
    }

    /// Clear `bits`.
    #[inline]
    pub fn clear_flags(&mut self, bits: u32) {
        self.flags &= !bits;
    }

    /// An observed version is held.
    #[inline]
    #[must_use]
    pub const fn has_read(&self) -> bool {
        self.flags & READ_BIT != 0
    }

    /// A pending write is held.
    #[inline]
    #[must_use]
    pub const fn has_write(&self) -> bool {
        self.flags & WRITE_BIT != 0
    }

    /// The participant lock is currently held for this item.
    #[inline]
    #[must_use]
    pub const fn needs_unlock(&self) -> bool {
        self.flags & LOCKED_BIT != 0
    }

    // ========================================================================
    //  Read side
    // ========================================================================

    /// Observed version. Meaningful only when [`has_read`](Self::has_read).
    #[inline]
    #[must_use]
    pub const fn read_version(&self) -> u64 {
        self.read_version
    }

    /// Record `version` as observed, replacing any earlier observation.
    #[inline]
    pub fn add_read(&mut self, version: u64) {
        self.read_version = version;
        self.flags |= READ_BIT;
    }

    /// Record `version` unless something was already observed.
    ///
    /// The first observation is what commit validates against.
    #[inline]
    pub fn observe(&mut self, version: u64) {
        if !self.has_read() {
            self.add_read(version);
        }
    }

    /// Replace an observation of `old` with `new`. No-op otherwise.
    ///
    /// Used when this transaction itself moved the version forward.
    #[inline]
    pub fn update_read(&mut self, old: u64, new: u64) -> bool {
        if self.has_read() && self.read_version == old {
            self.read_version = new;
            return true;
        }
        false
    }

    // ========================================================================
    //  Write side
    // ========================================================================

    /// Stage `value` as this item's pending write.
    pub fn add_write<T: Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.write_value = Some(Box::new(value));
        self.flags |= WRITE_BIT;
    }

    /// Pending write, if one of type `T` is staged.
    #[must_use]
    pub fn write_value<T: Send + Sync + 'static>(&self) -> Option<&Arc<T>> {
        self.write_value.as_deref()?.downcast_ref::<Arc<T>>()
    }

    /// Take the pending write out, leaving the write flag in place.
    pub fn take_write_value<T: Send + Sync + 'static>(&mut self) -> Option<Arc<T>> {
        let boxed = self.write_value.take()?;
        match boxed.downcast::<Arc<T>>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.write_value = Some(other);
                None
            }
        }
    }

    // ========================================================================
    //  Pin
    // ========================================================================

    /// Keep `referent` alive for as long as the item exists.
    ///
    /// The first pin wins; later calls are ignored.
    pub fn pin_with<F>(&mut self, referent: F)
    where
        F: FnOnce() -> Arc<dyn Any + Send + Sync>,
    {
        if self.pin.is_none() {
            self.pin = Some(referent());
        }
    }

    /// The pinned referent, if it is a `T`.
    #[must_use]
    pub fn pinned<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.pin.as_deref()?.downcast_ref::<T>()
    }
}
