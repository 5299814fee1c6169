//! Shared setup for the integration tests.
//!
//! `init_tracing()` installs one subscriber per test binary:
//! - console output through the test writer, so `cargo test` captures it
//!   per test (`STO_LOG_CONSOLE=0` turns it off);
//! - NDJSON appended to `$STO_LOG_DIR/sto.jsonl` (default `logs/`).
//!
//! Both honour `RUST_LOG` and default to `warn`. The library only emits
//! events when built with `--features tracing`:
//!
//! ```bash
//! RUST_LOG=sto=debug cargo test --features tracing --test art_scenarios
//! jq 'select(.fields.message == "transaction aborted") | .fields.reason' logs/sto.jsonl
//! ```

#![allow(dead_code)]

use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT: Once = Once::new();

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the subscriber. Later calls are no-ops.
pub fn init_tracing() {
    INIT.call_once(|| {
        let dir = env::var("STO_LOG_DIR").map_or_else(|_| PathBuf::from("logs"), PathBuf::from);

        // Logging is best effort: a read-only tree still runs the tests.
        let file_layer = fs::create_dir_all(&dir)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(dir.join("sto.jsonl")))
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_thread_ids(true)
                    .json()
                    .with_filter(filter())
            });

        let console_layer = (!env::var("STO_LOG_CONSOLE").is_ok_and(|v| v == "0")).then(|| {
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_thread_names(true)
                .compact()
                .with_filter(filter())
        });

        let _ = Registry::default()
            .with(console_layer)
            .with(file_layer)
            .try_init();
    });
}

/// Thread count for stress tests: `STO_STRESS_THREADS`, else `default`.
pub fn stress_threads(default: usize) -> usize {
    env::var("STO_STRESS_THREADS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(default)
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::warn!(target: "sto::tests", "subscriber installed");
    assert!(stress_threads(3) > 0);
}
