//! Per-identifier exponential backoff.
//!
//! Each limiter-level rejection bumps `failure_count` and locks the
//! identifier out for `min(base^failures * 1s, max)`. Expiry is lazy: the
//! first evaluation at or after `backoff_until` clears the lockout and the
//! failure count together.

use super::types::{RateLimitConfig, RateLimitRecord};
use std::time::{Duration, Instant};

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: u32,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: u32, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.backoff_base, config.max_backoff())
    }

    /// Lockout length after the given number of consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        u64::from(self.base)
            .checked_pow(failures)
            .and_then(|factor| factor.checked_mul(1000))
            .map(Duration::from_millis)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Whether the identifier is locked out.
///
/// The first call that observes an elapsed lockout clears it and resets the
/// failure count.
pub fn is_locked(record: &mut RateLimitRecord, now: Instant) -> bool {
    match record.backoff_until {
        Some(until) if now < until => true,
        Some(_) => {
            record.backoff_until = None;
            record.failure_count = 0;
            false
        }
        None => false,
    }
}

/// Record a rejection and start (or extend) the lockout. Returns the delay.
pub fn record_failure(record: &mut RateLimitRecord, now: Instant, policy: &BackoffPolicy) -> Duration {
    record.failure_count = record.failure_count.saturating_add(1);
    let delay = policy.delay_for(record.failure_count);
    record.backoff_until = Some(now + delay);
    delay
}
