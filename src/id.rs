//! ID generation utilities for Vizreg
//!
//! Run identifiers embed a millisecond timestamp so they sort in creation order.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;

/// Last timestamp component handed out by `generate_run_id`
static LAST_RUN_MS: AtomicU64 = AtomicU64::new(0);

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Current wall-clock time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a unique run ID
///
/// Format: `run-{timestamp_ms:013}-{random_hex}`
/// Example: `run-1738300800123-a1b2`
///
/// The timestamp component is strictly increasing within a process, so IDs
/// allocated here compare lexicographically in allocation order.
pub fn generate_run_id() -> String {
    let now = now_ms();
    let mut last = LAST_RUN_MS.load(Ordering::Relaxed);
    let stamp = loop {
        let next = now.max(last + 1);
        match LAST_RUN_MS.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => break next,
            Err(actual) => last = actual,
        }
    };
    let random: u16 = rand::rng().random();
    format!("run-{:013}-{:04x}", stamp, random)
}
