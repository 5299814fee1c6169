//! Shuttle tests for the commit protocol.
//!
//! Shuttle explores randomized thread schedules. The crate's real types use
//! `std` atomics, which shuttle cannot intercept, so these tests run a reduced
//! model of the protocol on shuttle's primitives:
//! - cells guarded by a version word (bit 0 = lock, counter in steps of 2)
//! - optimistic reads that remember the version
//! - commit: lock writes in address order, validate reads, install, unlock
//!
//! Run with: `cargo test --lib transaction::shuttle_tests`

use shuttle::sync::Arc;
use shuttle::sync::atomic::{AtomicU64, Ordering};
use shuttle::thread;

const LOCK: u64 = 1;
const STEP: u64 = 2;

// ============================================================================
//  Model
// ============================================================================

struct Cell {
    version: AtomicU64,
    value: AtomicU64,
}

impl Cell {
    fn new(value: u64) -> Self {
        Self {
            version: AtomicU64::new(0),
            value: AtomicU64::new(value),
        }
    }

    /// Optimistic read: (version, value) taken while unlocked and unchanged.
    fn read(&self) -> (u64, u64) {
        loop {
            let v1 = self.version.load(Ordering::Acquire);
            if v1 & LOCK != 0 {
                thread::yield_now();
                continue;
            }
            let value = self.value.load(Ordering::Acquire);
            if self.version.load(Ordering::Acquire) == v1 {
                return (v1, value);
            }
        }
    }

    fn try_lock(&self) -> bool {
        let v = self.version.load(Ordering::Relaxed);
        v & LOCK == 0
            && self
                .version
                .compare_exchange(v, v | LOCK, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    fn install_unlock(&self, value: u64) {
        self.value.store(value, Ordering::Release);
        let v = self.version.load(Ordering::Relaxed);
        self.version.store((v & !LOCK) + STEP, Ordering::Release);
    }

    fn unlock(&self) {
        let v = self.version.load(Ordering::Relaxed);
        self.version.store(v & !LOCK, Ordering::Release);
    }
}

/// A model transaction: reads with versions, writes staged by cell index.
struct ModelTxn<'a> {
    cells: &'a [Cell],
    reads: Vec<(usize, u64)>,
    writes: Vec<(usize, u64)>,
}

impl<'a> ModelTxn<'a> {
    const fn new(cells: &'a [Cell]) -> Self {
        Self {
            cells,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    fn read(&mut self, idx: usize) -> u64 {
        if let Some(&(_, value)) = self.writes.iter().find(|(i, _)| *i == idx) {
            return value;
        }
        let (version, value) = self.cells[idx].read();
        self.reads.push((idx, version));
        value
    }

    fn write(&mut self, idx: usize, value: u64) {
        self.writes.retain(|(i, _)| *i != idx);
        self.writes.push((idx, value));
    }

    fn try_commit(mut self) -> bool {
        self.writes.sort_by_key(|(i, _)| *i);
        let mut locked: Vec<usize> = Vec::new();
        for &(idx, _) in &self.writes {
            if !self.cells[idx].try_lock() {
                for &l in &locked {
                    self.cells[l].unlock();
                }
                return false;
            }
            locked.push(idx);
        }
        for &(idx, seen) in &self.reads {
            let cur = self.cells[idx].version.load(Ordering::Acquire);
            let ours = locked.contains(&idx);
            if cur & !LOCK != seen || (cur & LOCK != 0 && !ours) {
                for &l in &locked {
                    self.cells[l].unlock();
                }
                return false;
            }
        }
        for &(idx, value) in &self.writes {
            self.cells[idx].install_unlock(value);
        }
        true
    }
}

fn transfer(cells: &[Cell], from: usize, to: usize, amount: u64) {
    loop {
        let mut txn = ModelTxn::new(cells);
        let a = txn.read(from);
        let b = txn.read(to);
        if a < amount {
            return;
        }
        txn.write(from, a - amount);
        txn.write(to, b + amount);
        if txn.try_commit() {
            return;
        }
        thread::yield_now();
    }
}

// ============================================================================
//  Shuttle Tests
// ============================================================================

/// Opposite-direction transfers keep the total and never deadlock.
#[test]
fn test_shuttle_transfers_conserve_total() {
    shuttle::check_random(
        || {
            let cells = Arc::new([Cell::new(100), Cell::new(100)]);

            let c1 = Arc::clone(&cells);
            let t1 = thread::spawn(move || transfer(&c1[..], 0, 1, 30));

            let c2 = Arc::clone(&cells);
            let t2 = thread::spawn(move || transfer(&c2[..], 1, 0, 50));

            t1.join().unwrap();
            t2.join().unwrap();

            let total: u64 = cells.iter().map(|c| c.read().1).sum();
            assert_eq!(total, 200);
            assert_eq!(cells[0].read().1, 120);
        },
        200,
    );
}

/// A read-only snapshot of two cells never sees a half-applied transfer.
#[test]
fn test_shuttle_reader_sees_consistent_snapshot() {
    shuttle::check_random(
        || {
            let cells = Arc::new([Cell::new(100), Cell::new(0)]);

            let writer = {
                let cells = Arc::clone(&cells);
                thread::spawn(move || transfer(&cells[..], 0, 1, 40))
            };

            let reader = {
                let cells = Arc::clone(&cells);
                thread::spawn(move || {
                    loop {
                        let mut txn = ModelTxn::new(&cells[..]);
                        let a = txn.read(0);
                        let b = txn.read(1);
                        if txn.try_commit() {
                            return a + b;
                        }
                    }
                })
            };

            writer.join().unwrap();
            assert_eq!(reader.join().unwrap(), 100);
        },
        200,
    );
}

/// Two increments of one cell are both applied.
#[test]
fn test_shuttle_no_lost_update() {
    shuttle::check_random(
        || {
            let cells = Arc::new([Cell::new(0)]);
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let cells = Arc::clone(&cells);
                    thread::spawn(move || {
                        loop {
                            let mut txn = ModelTxn::new(&cells[..]);
                            let v = txn.read(0);
                            txn.write(0, v + 1);
                            if txn.try_commit() {
                                return;
                            }
                            thread::yield_now();
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(cells[0].read().1, 2);
        },
        200,
    );
}
