//! Filepath: src/config.rs
//!
//! Tuning knobs for spinning and retrying.

use std::hint;
use std::thread;

/// How a spinning caller waits between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// One `spin_loop` hint per attempt.
    Spin,
    /// `2^min(attempt, max_shift)` hints, then yield the thread once the
    /// shift is saturated.
    Exponential {
        /// Largest exponent used.
        max_shift: u32,
    },
    /// Yield the thread every attempt.
    Yield,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential { max_shift: 6 }
    }
}

impl Backoff {
    /// Wait once. `attempt` counts failed attempts so far, from zero.
    #[inline]
    pub fn pause(self, attempt: u32) {
        match self {
            Self::Spin => hint::spin_loop(),
            Self::Exponential { max_shift } => {
                if attempt > max_shift {
                    thread::yield_now();
                    return;
                }
                for _ in 0..(1_u32 << attempt.min(31)) {
                    hint::spin_loop();
                }
            }
            Self::Yield => thread::yield_now(),
        }
    }
}

/// Configuration shared by transactions and trees.
///
/// ```rust
/// use sto::{Backoff, StoConfig};
///
/// let config = StoConfig::new()
///     .commit_lock_spins(4)
///     .backoff(Backoff::Yield)
///     .max_attempts(Some(100));
/// assert_eq!(config.max_attempts, Some(100));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoConfig {
    /// `try_lock` attempts per write item in commit phase 1.
    pub commit_lock_spins: u32,

    /// Backoff between spin attempts.
    pub backoff: Backoff,

    /// Bound on attempts made by [`atomically_with`](crate::atomically_with).
    pub max_attempts: Option<u32>,
}

impl Default for StoConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl StoConfig {
    /// Default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            commit_lock_spins: 16,
            backoff: Backoff::Exponential { max_shift: 6 },
            max_attempts: None,
        }
    }

    /// Set the commit-time lock spin bound. Zero is treated as one attempt.
    #[must_use]
    pub const fn commit_lock_spins(mut self, spins: u32) -> Self {
        self.commit_lock_spins = spins;
        self
    }

    /// Set the backoff policy.
    #[must_use]
    pub const fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Bound the retry loop.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }
}
