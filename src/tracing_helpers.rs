//! Filepath: src/tracing_helpers.rs
//!
//! Zero-cost logging macros.
//!
//! With the `tracing` feature these forward to the `tracing` crate; without
//! it (the default) they expand to nothing.
//!
//! ```bash
//! # Aborts and growth for the ART tests
//! RUST_LOG=sto=debug cargo test --features tracing --test art_scenarios
//!
//! # Commit-level detail for the transaction driver only
//! RUST_LOG=sto::transaction=trace cargo test --features tracing
//! ```
//!
//! Field conventions: `txn` is the transaction id, `tid` a commit TID,
//! `reason` an [`AbortReason`](crate::AbortReason).

#![allow(unused_macros, unused_imports)]

/// Trace-level event. No-op without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

/// Debug-level event.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// Warn-level event.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
pub(crate) use warn_log;
