//! Monotonic clock utilities
//!
//! All timestamps in the session fabric are offsets from a process-wide
//! epoch captured on first use. Wall-clock time never enters the core, so
//! idle accounting is immune to system clock adjustments.

use std::sync::OnceLock;
use std::time::Instant;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic seconds since the process epoch
pub fn now_secs() -> u64 {
    epoch().elapsed().as_secs()
}

/// Monotonic milliseconds since the process epoch
pub fn now_millis() -> u64 {
    epoch().elapsed().as_millis() as u64
}
