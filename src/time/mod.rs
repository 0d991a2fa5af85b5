//! Process-local monotonic clock.

use once_cell::sync::Lazy;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Returns milliseconds elapsed since the process-local epoch.
/// Monotonic, so TTL arithmetic never goes backwards under clock changes.
pub fn now_millis() -> i64 {
    EPOCH.elapsed().as_millis() as i64
}
