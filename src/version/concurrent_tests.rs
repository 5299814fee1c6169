//! Concurrent tests for VersionWord.
//!
//! These check the atomic operations under real thread contention.
//! Guarded with `#[cfg(not(miri))]` because Miri handles threads slowly.

use super::*;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_lock_bump_unlock() {
    let version = Arc::new(VersionWord::new(0));
    let iterations: u64 = 1000;
    let num_threads: u64 = 4;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let v = Arc::clone(&version);
            thread::spawn(move || {
                let tag = OwnerTag::from_slot(t);
                for _ in 0..iterations {
                    v.lock(tag);
                    assert!(v.is_locked_by(tag));
                    v.bump_version();
                    v.unlock();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("thread panicked");
    }

    assert!(!version.is_locked());
    assert_eq!(version.value(), iterations * num_threads * INCREMENT);
}

#[test]
fn test_stable_waits_for_unlock() {
    let version = Arc::new(VersionWord::new(0));
    let writer_done = Arc::new(AtomicBool::new(false));

    let tag = OwnerTag::from_slot(1);
    version.lock(tag);

    let v_reader = Arc::clone(&version);
    let done = Arc::clone(&writer_done);
    let reader = thread::spawn(move || {
        let snapshot = v_reader.stable();
        // stable() only returns once the writer released the lock.
        assert!(done.load(Ordering::Acquire));
        snapshot
    });

    thread::sleep(Duration::from_millis(20));
    version.bump_version();
    writer_done.store(true, Ordering::Release);
    version.unlock();

    let snapshot = reader.join().expect("reader panicked");
    assert_eq!(snapshot, INCREMENT);
}

#[test]
fn test_try_lock_has_single_winner() {
    for _ in 0..50 {
        let version = Arc::new(VersionWord::new(0));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let v = Arc::clone(&version);
                thread::spawn(move || v.try_lock(OwnerTag::from_slot(t)))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}

#[test]
fn test_reader_detects_concurrent_change() {
    let version = Arc::new(VersionWord::new(0));
    let seen = version.stable();

    let v = Arc::clone(&version);
    thread::spawn(move || {
        let guard = v.lock_guard(OwnerTag::ANONYMOUS, Backoff::Yield);
        guard.bump_version();
    })
    .join()
    .expect("writer panicked");

    assert!(version.has_changed(seen));
    assert!(!version.check(seen, OwnerTag::ANONYMOUS));
}
