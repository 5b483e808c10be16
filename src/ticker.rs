use std::time::Duration;

/// Timer update interval in milliseconds
pub const TICK_MS: u64 = 1000;

/// Get tick duration
pub fn tick_duration() -> Duration {
    Duration::from_millis(TICK_MS)
}
