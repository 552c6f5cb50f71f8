//! Timestamp helpers.
//!
//! All engine timestamps are u64 nanoseconds since the Unix epoch. Components
//! take timestamps as data so pure logic never touches the clock directly.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in nanoseconds since the Unix epoch.
///
/// Falls back to 0 with an error log if the system clock reads before the
/// epoch, rather than panicking inside a hot path.
pub fn now_ns() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as u64,
        Err(e) => {
            tracing::error!("system clock before Unix epoch: {}", e);
            0
        }
    }
}

pub const NANOS_PER_MILLI: u64 = 1_000_000;
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Convert a millisecond duration to nanoseconds.
pub const fn millis_to_ns(ms: u64) -> u64 {
    ms * NANOS_PER_MILLI
}

/// Convert a second duration to nanoseconds.
pub const fn secs_to_ns(secs: u64) -> u64 {
    secs * NANOS_PER_SEC
}
