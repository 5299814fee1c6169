//! Multi-threaded stress tests for `ArtTree` and `TBox`.
//!
//! Thread counts default to values that finish quickly in debug builds and
//! can be raised with `STO_STRESS_THREADS`:
//!
//! ```bash
//! STO_STRESS_THREADS=32 cargo test --release --test stress_tests
//! ```

#![allow(clippy::pedantic)]
#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use sto::{ArtTree, StoConfig, TBox, Transaction, atomically, atomically_with, stats};

fn get(tree: &ArtTree<u64>, key: &[u8]) -> Option<u64> {
    atomically(|txn| Ok(tree.lookup(txn, key)?.map(|v| *v)))
}

// =============================================================================
// Concurrent inserts
// =============================================================================

/// 128 threads each insert `"abcde" + (char)i` and read it back.
#[test]
fn shared_prefix_one_key_per_thread() {
    common::init_tracing();
    let threads = common::stress_threads(128).min(256);

    let tree = Arc::new(ArtTree::<u64>::new());
    let verify_failures = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let tree = Arc::clone(&tree);
            let verify_failures = Arc::clone(&verify_failures);
            thread::spawn(move || {
                let mut key = b"abcde".to_vec();
                key.push(i as u8);
                atomically(|txn| tree.insert(txn, &key, i as u64));
                if get(&tree, &key) != Some(i as u64) {
                    verify_failures.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(verify_failures.load(Ordering::Relaxed), 0);
    for i in 0..threads {
        let mut key = b"abcde".to_vec();
        key.push(i as u8);
        assert_eq!(get(&tree, &key), Some(i as u64), "key {i} lost");
    }
    assert_eq!(tree.census().records, threads);
}

/// Many keys per thread under a shared prefix, with immediate verification.
#[test]
fn many_keys_per_thread() {
    common::init_tracing();
    const KEYS_PER_THREAD: usize = 500;
    let threads = common::stress_threads(8);

    let tree = Arc::new(ArtTree::<u64>::new());
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..KEYS_PER_THREAD {
                    let key = format!("key_{i:05}_{t:03}");
                    let value = (t * 100_000 + i) as u64;
                    atomically(|txn| tree.insert(txn, key.as_bytes(), value));
                    assert_eq!(get(&tree, key.as_bytes()), Some(value));
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let mut missing = Vec::new();
    for t in 0..threads {
        for i in 0..KEYS_PER_THREAD {
            let key = format!("key_{i:05}_{t:03}");
            if get(&tree, key.as_bytes()) != Some((t * 100_000 + i) as u64) {
                missing.push((t, i));
            }
        }
    }
    assert!(missing.is_empty(), "missing {} keys: {:?}", missing.len(), &missing[..missing.len().min(20)]);
    assert_eq!(tree.census().records, threads * KEYS_PER_THREAD);
}

/// Threads race to add children to one node while it grows to a Node256.
#[test]
fn racing_growth_of_one_node() {
    common::init_tracing();
    const THREADS: usize = 4;

    let tree = Arc::new(ArtTree::<u64>::new());
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for b in (t..256).step_by(THREADS) {
                    let key = [b'g', b as u8];
                    atomically(|txn| tree.insert(txn, &key, b as u64));
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for b in 0..256_usize {
        assert_eq!(get(&tree, &[b'g', b as u8]), Some(b as u64));
    }
    let census = tree.census();
    assert_eq!(census.node256, 2, "{census:?}");
    assert_eq!(census.records, 256);
}

/// Insert and remove the same keys repeatedly; the last operation wins.
#[test]
fn insert_remove_churn() {
    common::init_tracing();
    const ROUNDS: usize = 200;
    let threads = common::stress_threads(4);

    let tree = Arc::new(ArtTree::<u64>::new());
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let key = format!("churn{t}");
                for round in 0..ROUNDS {
                    atomically(|txn| tree.insert(txn, key.as_bytes(), round as u64));
                    atomically(|txn| tree.remove(txn, key.as_bytes()));
                }
                atomically(|txn| tree.insert(txn, key.as_bytes(), u64::MAX));
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for t in 0..threads {
        assert_eq!(get(&tree, format!("churn{t}").as_bytes()), Some(u64::MAX));
    }
    assert_eq!(tree.census().records, threads);
}

// =============================================================================
// Serializability invariants
// =============================================================================

/// Transfers between accounts never create or destroy money, and every
/// committed reader sees the full total.
#[test]
fn bank_transfers_conserve_total() {
    common::init_tracing();
    const ACCOUNTS: usize = 8;
    const INITIAL: i64 = 1_000;
    const TRANSFERS: usize = 300;
    let threads = common::stress_threads(4);

    let tree = Arc::new(ArtTree::<i64>::new());
    let account = |i: usize| format!("acct{i}").into_bytes();
    {
        let mut txn = Transaction::new();
        for i in 0..ACCOUNTS {
            tree.insert(&mut txn, &account(i), INITIAL).unwrap();
        }
        txn.commit().unwrap();
    }
    let aborts_before = stats::snapshot().total_aborts();

    let mut handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for n in 0..TRANSFERS {
                    let from = account((t + n) % ACCOUNTS);
                    let to = account((t * 3 + n * 7 + 1) % ACCOUNTS);
                    if from == to {
                        continue;
                    }
                    atomically(|txn| {
                        let a = tree.lookup(txn, &from)?.map_or(0, |v| *v);
                        let b = tree.lookup(txn, &to)?.map_or(0, |v| *v);
                        tree.update(txn, &from, a - 1)?;
                        tree.update(txn, &to, b + 1)
                    });
                }
            })
        })
        .collect();

    let auditor = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for _ in 0..100 {
                let total: i64 = atomically(|txn| {
                    let mut sum = 0;
                    for i in 0..ACCOUNTS {
                        sum += tree.lookup(txn, &account(i))?.map_or(0, |v| *v);
                    }
                    Ok(sum)
                });
                assert_eq!(total, INITIAL * ACCOUNTS as i64);
            }
        })
    };
    handles.push(auditor);

    for h in handles {
        h.join().unwrap();
    }

    let total: i64 = (0..ACCOUNTS).map(|i| get_i64(&tree, &account(i))).sum();
    assert_eq!(total, INITIAL * ACCOUNTS as i64);
    eprintln!(
        "bank_transfers_conserve_total: {} aborts",
        stats::snapshot().total_aborts() - aborts_before
    );
}

fn get_i64(tree: &ArtTree<i64>, key: &[u8]) -> i64 {
    atomically(|txn| Ok(tree.lookup(txn, key)?.map_or(0, |v| *v)))
}

/// Read-modify-write increments on one box lose nothing.
#[test]
fn tbox_counter_no_lost_updates() {
    common::init_tracing();
    const INCREMENTS: u64 = 500;
    let threads = common::stress_threads(4);

    let counter = Arc::new(TBox::new(0_u64));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..INCREMENTS {
                    atomically(|txn| {
                        let n = *counter.read(txn)?;
                        counter.write(txn, n + 1)
                    });
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*counter.nontrans_read(), threads as u64 * INCREMENTS);
}

/// `atomically_with` gives up under a bound instead of spinning forever.
#[test]
fn bounded_retries_report_last_abort() {
    let tree: ArtTree<u64> = ArtTree::new();
    let mut holder = Transaction::new();
    tree.insert(&mut holder, b"held", 1).unwrap();

    let config = StoConfig::new().max_attempts(Some(5));
    let result = atomically_with(&config, |txn| tree.lookup(txn, b"held"));
    assert!(result.is_err());

    assert!(holder.try_commit());
    assert_eq!(atomically_with(&config, |txn| tree.lookup(txn, b"held")).unwrap().as_deref(), Some(&1));
}
