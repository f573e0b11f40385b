//! Monotonic Clock
//!
//! Single time source shared by every component. TTL and LRU arithmetic use
//! the monotonic reading; wall-clock timestamps are only for human-readable
//! metadata (index records, reports, checkpoints).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Shared monotonic clock.
///
/// Readings are nanoseconds since the clock was created. The offset lets
/// tests move time forward deterministically instead of sleeping; nothing
/// outside of tests mutates it.
#[derive(Debug)]
pub struct Clock {
    start: Instant,
    offset_nanos: AtomicU64,
}

impl Clock {
    /// Create a new clock anchored at the current instant
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Monotonic reading in nanoseconds
    pub fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64 + self.offset_nanos.load(Ordering::Relaxed)
    }

    /// Duration elapsed since an earlier `now()` reading
    pub fn elapsed_since(&self, earlier: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(earlier))
    }

    /// Wall-clock timestamp for metadata. Follows `advance` so monotonic
    /// and wall readings never disagree inside one process.
    pub fn wall(&self) -> DateTime<Utc> {
        let offset = self.offset_nanos.load(Ordering::Relaxed);
        Utc::now() + chrono::Duration::nanoseconds(offset as i64)
    }

    /// Shift the clock forward without waiting.
    /// Lets TTL and LRU tests run instantly.
    pub fn advance(&self, d: Duration) {
        self.offset_nanos
            .fetch_add(d.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a monotonic reading to milliseconds
#[inline]
pub fn nanos_to_millis(nanos: u64) -> f64 {
    nanos as f64 / 1_000_000.0
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_monotonic() {
        let clock = Clock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_clock_advance() {
        let clock = Clock::new();
        let before = clock.now();
        clock.advance(Duration::from_secs(60));
        let after = clock.now();
        assert!(after - before >= 60 * 1_000_000_000);
    }

    #[test]
    fn test_elapsed_since() {
        let clock = Clock::new();
        let mark = clock.now();
        clock.advance(Duration::from_millis(250));
        let elapsed = clock.elapsed_since(mark);
        assert!(elapsed >= Duration::from_millis(250));
    }

    #[test]
    fn test_elapsed_since_future_reading_saturates() {
        let clock = Clock::new();
        let future = clock.now() + 1_000_000_000;
        assert_eq!(clock.elapsed_since(future), Duration::from_nanos(0));
    }

    #[test]
    fn test_wall_clock_is_recent() {
        let clock = Clock::new();
        let wall = clock.wall();
        let delta = Utc::now().signed_duration_since(wall);
        assert!(delta.num_seconds() < 5);
    }

    #[test]
    fn test_wall_clock_follows_advance() {
        let clock = Clock::new();
        clock.advance(Duration::from_secs(3600));
        let delta = clock.wall().signed_duration_since(Utc::now());
        assert!(delta.num_seconds() >= 3590);
    }

    #[test]
    fn test_nanos_to_millis() {
        assert_eq!(nanos_to_millis(1_500_000), 1.5);
        assert_eq!(nanos_to_millis(0), 0.0);
    }
}
