//! # `sto`
//!
//! Software transactional memory over version-stamped objects, with a
//! transactional adaptive radix tree as its main container.
//!
//! Every shared object carries a [`VersionWord`](version::VersionWord): a
//! counter plus lock and status bits in one `u64`. Transactions read
//! optimistically, remembering the versions they saw, and buffer their
//! writes. At commit the [`Transaction`] driver runs five phases over the
//! read/write set:
//!
//! | Phase | Action |
//! |-------|--------|
//! | 1 | lock every write, in a global `(participant, key)` order |
//! | 2 | check every read against the live version |
//! | 3 | install the writes, stamping a fresh commit TID |
//! | 4 | unlock |
//! | 5 | cleanup, committed or not |
//!
//! Containers plug in by implementing [`Participant`].
//!
//! ## Containers
//!
//! - [`ArtTree`]: byte-string keys, `Node4`/`Node16`/`Node48`/`Node256`
//!   nodes that grow in place, phantom protection through versioned
//!   "absent" observations.
//! - [`TBox`]: one transactional value.
//!
//! ## Example
//!
//! ```rust
//! use sto::{ArtTree, TBox, atomically};
//!
//! let accounts: ArtTree<i64> = ArtTree::new();
//! let audit = TBox::new(0_u64);
//!
//! atomically(|txn| {
//!     accounts.insert(txn, b"alice", 100)?;
//!     accounts.insert(txn, b"bob", 50)?;
//!     audit.write(txn, 1)
//! });
//!
//! let total = atomically(|txn| {
//!     let a = accounts.lookup(txn, b"alice")?.map_or(0, |v| *v);
//!     let b = accounts.lookup(txn, b"bob")?.map_or(0, |v| *v);
//!     Ok(a + b)
//! });
//! assert_eq!(total, 150);
//! assert_eq!(*audit.nontrans_read(), 1);
//! ```
//!
//! ## Errors
//!
//! Conflicts surface as [`Abort`]. By the time an operation returns one,
//! the transaction has released its locks and run its cleanup; the caller
//! starts a new transaction (or lets [`atomically`] do it).
//!
//! ## Logging
//!
//! Build with `--features tracing` to emit `tracing` events for aborts,
//! commits and node growth.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod tracing_helpers;

pub mod art;
pub mod config;
pub mod error;
pub mod item;
pub mod participant;
pub mod stats;
pub mod tbox;
pub mod transaction;
pub mod version;

pub use art::{ArtTree, NodeCensus, NodeKind};
pub use config::{Backoff, StoConfig};
pub use error::{Abort, AbortReason};
pub use item::{ItemKey, TransItem};
pub use participant::Participant;
pub use tbox::TBox;
pub use transaction::{Transaction, TxnInfo, TxnState, atomically, atomically_with};
