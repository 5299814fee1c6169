//! Filepath: src/version.rs
//!
//! Version words for optimistic concurrency control.
//!
//! [`VersionWord`] packs a monotonic counter, a lock bit tagged with the
//! owning transaction, and a handful of status bits into one `u64`. Every
//! transactional object in the crate (records, trie nodes, boxes) carries one.
//!
//! # Concurrency Model
//! 1. Readers: call [`VersionWord::stable`], read the protected data, then
//!    call [`VersionWord::has_changed`] (or remember the snapshot for commit).
//! 2. Writers: acquire with [`VersionWord::try_lock`] / [`VersionWord::lock`]
//!    (or [`VersionWord::lock_guard`]), mutate, bump the counter, unlock.
//!
//! # Layout
//! ```text
//! bits 63..21  counter (INCREMENT = 1 << 21)
//! bit  20      must-grow
//! bit  19      invalid
//! bit  18      user (record inserted by a still-open transaction)
//! bit  17      nonopaque
//! bit  16      lock
//! bits 15..0   owner tag of the lock holder
//! ```

use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::Backoff;

// ============================================================================
//  Bit Constants
// ============================================================================

/// Owner tag of the lock holder. Zero when unlocked.
pub const OWNER_MASK: u64 = 0xFFFF;

/// Lock bit.
pub const LOCK_BIT: u64 = 1 << 16;

/// Version participates in non-opaque validation.
pub const NONOPAQUE_BIT: u64 = 1 << 17;

/// Record was inserted by a transaction that has not committed yet.
pub const USER_BIT: u64 = 1 << 18;

/// Node has been replaced and must never be used as a current child again.
pub const INVALID_BIT: u64 = 1 << 19;

/// Node is being replaced by a larger variant.
pub const MUST_GROW_BIT: u64 = 1 << 20;

/// One unit of the version counter.
pub const INCREMENT: u64 = 1 << 21;

/// Everything below the counter.
pub const STATUS_MASK: u64 = INCREMENT - 1;

const LOCK_MASK: u64 = LOCK_BIT | OWNER_MASK;

// ============================================================================
//  OwnerTag
// ============================================================================

/// Identity embedded in a locked version word.
///
/// Never zero, so a locked word always carries a nonzero owner field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerTag(u16);

impl OwnerTag {
    /// Tag used by non-transactional paths.
    pub const ANONYMOUS: Self = Self(0xFFFF);

    /// Tag for `slot`, mapped into `1..=0xFFFE`.
    ///
    /// Two slots that differ by a multiple of `0xFFFE` share a tag. Callers
    /// that need a tag no live transaction holds use [`OwnerLease`].
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "value is reduced modulo 0xFFFE first"
    )]
    pub const fn from_slot(slot: u64) -> Self {
        Self((slot % 0xFFFE) as u16 + 1)
    }

    /// Raw tag bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0 as u64
    }
}

// ============================================================================
//  OwnerLease
// ============================================================================

/// Tags `1..=0xFFFE`, one bit each; bit `tag - 1` is set while leased.
const TAG_WORDS: usize = 1024;
static TAGS_IN_USE: [AtomicU64; TAG_WORDS] = [const { AtomicU64::new(0) }; TAG_WORDS];
static TAG_CURSOR: AtomicUsize = AtomicUsize::new(0);

/// Bits of `word` that do not map to a leasable tag.
const fn reserved_bits(word: usize) -> u64 {
    if word == TAG_WORDS - 1 {
        // Slots 0xFFFE and 0xFFFF would be tags 0xFFFF (anonymous) and 0x10000.
        !0 << 62
    } else {
        0
    }
}

/// Exclusive hold on an [`OwnerTag`].
///
/// No two live leases carry the same tag, so a lock tagged with a leased
/// tag can only be "ours" to the lease holder. The tag returns to the pool
/// on drop.
///
/// ```rust
/// use sto::version::OwnerLease;
///
/// let a = OwnerLease::acquire();
/// let b = OwnerLease::acquire();
/// assert_ne!(a.tag(), b.tag());
/// ```
#[derive(Debug)]
pub struct OwnerLease {
    tag: OwnerTag,
}

impl OwnerLease {
    /// Lease a free tag, waiting if all `0xFFFE` are held.
    #[must_use]
    pub fn acquire() -> Self {
        let start = TAG_CURSOR.fetch_add(1, Ordering::Relaxed) % TAG_WORDS;
        let mut attempt: u32 = 0;
        loop {
            for offset in 0..TAG_WORDS {
                let word = (start + offset) % TAG_WORDS;
                if let Some(tag) = Self::claim_in(word) {
                    return Self { tag };
                }
            }
            Backoff::default().pause(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "word * 64 + bit < 0xFFFE"
    )]
    fn claim_in(word: usize) -> Option<OwnerTag> {
        let slot = &TAGS_IN_USE[word];
        let mut current = slot.load(Ordering::Relaxed);
        loop {
            let free = !(current | reserved_bits(word));
            if free == 0 {
                return None;
            }
            let bit = free.trailing_zeros();
            match slot.compare_exchange_weak(
                current,
                current | (1 << bit),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(OwnerTag((word * 64) as u16 + bit as u16 + 1)),
                Err(now) => current = now,
            }
        }
    }

    /// The leased tag.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> OwnerTag {
        self.tag
    }
}

impl Drop for OwnerLease {
    fn drop(&mut self) {
        let index = usize::from(self.tag.0 - 1);
        TAGS_IN_USE[index / 64].fetch_and(!(1 << (index % 64)), Ordering::Release);
    }
}

// ============================================================================
//  Commit TID source
// ============================================================================

static GLOBAL_TID: AtomicU64 = AtomicU64::new(INCREMENT);

/// Allocate the next commit TID.
///
/// Strictly increasing multiples of [`INCREMENT`], always larger than the
/// initial counter of a freshly created record.
#[must_use]
pub fn next_commit_tid() -> u64 {
    GLOBAL_TID.fetch_add(INCREMENT, Ordering::AcqRel) + INCREMENT
}

// ============================================================================
//  VersionWord
// ============================================================================

/// Packed counter + lock + status word.
///
/// # Example
///
/// ```rust
/// use sto::version::{OwnerTag, VersionWord};
///
/// let v = VersionWord::new(0);
/// let before = v.stable();
///
/// assert!(v.try_lock(OwnerTag::ANONYMOUS));
/// v.bump_version();
/// v.unlock();
///
/// assert!(v.has_changed(before));
/// ```
pub struct VersionWord {
    value: AtomicU64,
}

impl StdFmt::Debug for VersionWord {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        let v = self.value();
        f.debug_struct("VersionWord")
            .field("counter", &(v >> INCREMENT.trailing_zeros()))
            .field("locked", &is_locked(v))
            .field("owner", &(v & OWNER_MASK))
            .field("status", &format_args!("{:#07b}", (v & STATUS_MASK) >> 16))
            .finish()
    }
}

impl Default for VersionWord {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Whether a raw value has its lock bit set.
#[inline]
#[must_use]
pub const fn is_locked(value: u64) -> bool {
    value & LOCK_BIT != 0
}

/// Whether a raw value carries the invalid bit.
#[inline]
#[must_use]
pub const fn is_invalid(value: u64) -> bool {
    value & INVALID_BIT != 0
}

/// Whether a raw value carries the user (inserted) bit.
#[inline]
#[must_use]
pub const fn is_user(value: u64) -> bool {
    value & USER_BIT != 0
}

/// Compare two raw values on the counter only.
#[inline]
#[must_use]
pub const fn same_counter(a: u64, b: u64) -> bool {
    (a ^ b) & !STATUS_MASK == 0
}

impl VersionWord {
    /// Create a word with the given raw value.
    #[must_use]
    pub const fn new(initial: u64) -> Self {
        debug_assert!(initial & LOCK_MASK == 0, "initial value must be unlocked");
        Self {
            value: AtomicU64::new(initial),
        }
    }

    /// Raw current value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Spin until unlocked and return that snapshot.
    #[inline]
    #[must_use]
    pub fn stable(&self) -> u64 {
        let mut attempt: u32 = 0;
        loop {
            let value = self.value.load(Ordering::Acquire);
            if !is_locked(value) {
                return value;
            }
            Backoff::Spin.pause(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    /// True if anything other than the lock bit and owner changed since `old`.
    #[inline]
    #[must_use]
    pub fn has_changed(&self, old: u64) -> bool {
        (old ^ self.value()) & !LOCK_MASK != 0
    }

    /// True if the word is unchanged modulo the lock held by `owner`.
    ///
    /// This is the commit-time validation rule: a version locked by someone
    /// else never validates, one locked by us validates if the rest matches.
    #[inline]
    #[must_use]
    pub fn check(&self, old: u64, owner: OwnerTag) -> bool {
        let cur = self.value();
        if is_locked(cur) && cur & OWNER_MASK != owner.bits() {
            return false;
        }
        (old ^ cur) & !LOCK_MASK == 0
    }

    // ========================================================================
    //  Flag Accessors
    // ========================================================================

    /// Lock bit set.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        is_locked(self.value())
    }

    /// Lock bit set with `owner` as the holder.
    #[inline]
    #[must_use]
    pub fn is_locked_by(&self, owner: OwnerTag) -> bool {
        self.value() & LOCK_MASK == LOCK_BIT | owner.bits()
    }

    /// Invalid bit set.
    #[inline]
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        is_invalid(self.value())
    }

    /// Must-grow bit set.
    #[inline]
    #[must_use]
    pub fn must_grow(&self) -> bool {
        self.value() & MUST_GROW_BIT != 0
    }

    /// User bit set.
    #[inline]
    #[must_use]
    pub fn is_user(&self) -> bool {
        is_user(self.value())
    }

    // ========================================================================
    //  Lock Operations
    // ========================================================================

    /// One CAS attempt from unlocked to locked-by-`owner`.
    #[inline]
    #[must_use]
    pub fn try_lock(&self, owner: OwnerTag) -> bool {
        let value = self.value.load(Ordering::Relaxed);
        if is_locked(value) {
            return false;
        }
        self.value
            .compare_exchange(
                value,
                value | LOCK_BIT | owner.bits(),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Spin on [`try_lock`](Self::try_lock) with the default backoff.
    #[inline]
    pub fn lock(&self, owner: OwnerTag) {
        self.lock_with(owner, Backoff::default());
    }

    /// Spin on [`try_lock`](Self::try_lock), pausing per `backoff`.
    pub fn lock_with(&self, owner: OwnerTag, backoff: Backoff) {
        let mut attempt: u32 = 0;
        while !self.try_lock(owner) {
            backoff.pause(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    /// Lock and return a guard that unlocks on drop.
    #[must_use = "releasing a lock without using the guard is a logic error"]
    pub fn lock_guard(&self, owner: OwnerTag, backoff: Backoff) -> VersionGuard<'_> {
        self.lock_with(owner, backoff);
        VersionGuard {
            version: self,
            _marker: PhantomData,
        }
    }

    /// Clear the lock bit and owner.
    ///
    /// # Panics
    /// In debug builds, if the word is not locked.
    #[inline]
    pub fn unlock(&self) {
        let value = self.value.load(Ordering::Relaxed);
        debug_assert!(is_locked(value), "unlock() on an unlocked version");
        self.value.store(value & !LOCK_MASK, Ordering::Release);
    }

    /// Add one [`INCREMENT`] to the counter. Caller must hold the lock.
    #[inline]
    pub fn bump_version(&self) {
        let value = self.value.load(Ordering::Relaxed);
        debug_assert!(is_locked(value), "bump_version() without the lock");
        self.value
            .store(value.wrapping_add(INCREMENT), Ordering::Release);
    }

    /// Replace counter and status with `new_value` and release the lock.
    ///
    /// Caller must hold the lock. `new_value`'s own lock bits are ignored.
    #[inline]
    pub fn set_version_unlock(&self, new_value: u64) {
        debug_assert!(self.is_locked(), "set_version_unlock() without the lock");
        self.value.store(new_value & !LOCK_MASK, Ordering::Release);
    }

    /// OR in the invalid bit. Caller must hold the lock.
    #[inline]
    pub fn mark_invalid(&self) {
        self.set_status(INVALID_BIT);
    }

    /// OR in the must-grow bit. Caller must hold the lock.
    #[inline]
    pub fn mark_must_grow(&self) {
        self.set_status(MUST_GROW_BIT);
    }

    /// Clear the user bit. Caller must hold the lock.
    #[inline]
    pub fn clear_user(&self) {
        let value = self.value.load(Ordering::Relaxed);
        debug_assert!(is_locked(value), "clear_user() without the lock");
        self.value.store(value & !USER_BIT, Ordering::Release);
    }

    fn set_status(&self, bits: u64) {
        let value = self.value.load(Ordering::Relaxed);
        debug_assert!(is_locked(value), "status change without the lock");
        self.value.store(value | bits, Ordering::Release);
    }
}

// ============================================================================
//  VersionGuard
// ============================================================================

/// Proof that a [`VersionWord`] is locked. Unlocks on drop.
///
/// `!Send` so a lock never migrates to another thread.
#[derive(Debug)]
#[must_use = "releasing a lock without using the guard is a logic error"]
pub struct VersionGuard<'a> {
    version: &'a VersionWord,
    _marker: PhantomData<*mut ()>,
}

impl VersionGuard<'_> {
    /// Locked raw value (lock and owner bits included).
    #[inline]
    #[must_use]
    pub fn locked_value(&self) -> u64 {
        self.version.value.load(Ordering::Relaxed)
    }

    /// Locked value with the lock bit and owner cleared.
    ///
    /// What an unlocked reader observed before this lock was taken, assuming
    /// nothing changed in between.
    #[inline]
    #[must_use]
    pub fn unlocked_value(&self) -> u64 {
        self.locked_value() & !LOCK_MASK
    }

    /// Bump the counter while locked.
    #[inline]
    pub fn bump_version(&self) {
        self.version.bump_version();
    }

    /// Flag the node as dead and about to be replaced by a larger one.
    #[inline]
    pub fn mark_grown(&self) {
        self.version.mark_must_grow();
        self.version.mark_invalid();
    }

    /// Invalid bit visible under the lock.
    #[inline]
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        is_invalid(self.locked_value())
    }
}

impl Drop for VersionGuard<'_> {
    fn drop(&mut self) {
        self.version.unlock();
    }
}

#[cfg(all(test, not(miri), not(loom)))]
mod concurrent_tests;
