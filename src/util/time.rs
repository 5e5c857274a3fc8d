//! Time utilities for the match simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Default simulation rate
pub const DEFAULT_TICK_RATE_HZ: u32 = 60;

/// Wall-clock duration of one tick at the given rate
pub fn tick_duration(tick_rate_hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate_hz.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_duration_matches_rate() {
        assert_eq!(tick_duration(60), Duration::from_micros(16_666));
        assert_eq!(tick_duration(1), Duration::from_secs(1));
        // zero is treated as 1 Hz rather than dividing by zero
        assert_eq!(tick_duration(0), Duration::from_secs(1));
    }

    #[test]
    fn uptime_is_zero_before_init_or_small_after() {
        init_server_time();
        assert!(uptime_secs() < 5);
    }
}
