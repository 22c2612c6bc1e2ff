//! Fixed-window request counter.
//!
//! A window starts at the first admission after the previous one elapsed and
//! lasts exactly one window length. Up to `2 * limit` requests can get through
//! when a burst straddles a window boundary; the counter trades that for O(1)
//! state per identifier.

use super::types::RateLimitRecord;
use std::time::{Duration, Instant};

/// Outcome of counting one request against the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: Instant,
}

/// Count a request against the record's window.
///
/// Restarts the window at `count = 1` when the previous one has elapsed.
pub fn admit(
    record: &mut RateLimitRecord,
    now: Instant,
    limit: u32,
    window: Duration,
) -> WindowOutcome {
    if record.window_elapsed(now) {
        record.window_count = 1;
        record.window_reset_at = now + window;
    } else {
        record.window_count = record.window_count.saturating_add(1);
    }

    WindowOutcome {
        allowed: record.window_count <= limit,
        remaining: limit.saturating_sub(record.window_count),
        reset_at: record.window_reset_at,
    }
}

/// Remaining quota without counting a request
pub fn remaining(record: &RateLimitRecord, now: Instant, limit: u32) -> u32 {
    if record.window_elapsed(now) {
        limit
    } else {
        limit.saturating_sub(record.window_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_admits_up_to_limit() {
        let now = Instant::now();
        let mut record = RateLimitRecord::new("a", now, WINDOW);

        for expected_remaining in (0..5).rev() {
            let outcome = admit(&mut record, now, 5, WINDOW);
            assert!(outcome.allowed);
            assert_eq!(outcome.remaining, expected_remaining);
        }

        let outcome = admit(&mut record, now, 5, WINDOW);
        assert!(!outcome.allowed);
        assert_eq!(outcome.remaining, 0);
        assert_eq!(record.window_count, 6);
    }

    #[test]
    fn test_window_restarts_at_one() {
        let start = Instant::now();
        let mut record = RateLimitRecord::new("a", start, WINDOW);
        for _ in 0..3 {
            admit(&mut record, start, 2, WINDOW);
        }

        let later = start + WINDOW + Duration::from_secs(1);
        let outcome = admit(&mut record, later, 2, WINDOW);

        assert!(outcome.allowed);
        assert_eq!(record.window_count, 1);
        assert_eq!(record.window_reset_at, later + WINDOW);
        assert_eq!(outcome.reset_at, later + WINDOW);
    }

    #[test]
    fn test_reset_instant_is_not_elapsed() {
        let start = Instant::now();
        let mut record = RateLimitRecord::new("a", start, WINDOW);
        admit(&mut record, start, 1, WINDOW);

        // exactly at the reset instant the old window still applies
        let outcome = admit(&mut record, start + WINDOW, 1, WINDOW);
        assert!(!outcome.allowed);
    }

    #[test]
    fn test_remaining_does_not_count() {
        let now = Instant::now();
        let mut record = RateLimitRecord::new("a", now, WINDOW);
        admit(&mut record, now, 3, WINDOW);

        assert_eq!(remaining(&record, now, 3), 2);
        assert_eq!(remaining(&record, now, 3), 2);
        assert_eq!(remaining(&record, now + WINDOW * 2, 3), 3);
    }
}
