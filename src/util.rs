//! Shared utility functions.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current timestamp as seconds since Unix epoch.
///
/// Returns the timestamp as a simple string (e.g., "1705312345").
pub fn current_timestamp() -> String {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    format!("{}", duration.as_secs())
}

/// Call `check` up to `attempts` times, sleeping `interval` between calls.
///
/// Returns true as soon as `check` does.
pub fn wait_for<F>(attempts: u32, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for attempt in 1..=attempts {
        if check() {
            return true;
        }
        if attempt < attempts {
            std::thread::sleep(interval);
        }
    }
    false
}
