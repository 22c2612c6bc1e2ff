use crate::error::{GatewayError, Result};
use serde::Deserialize;
use std::time::{Duration, Instant};

/// Longest window, backoff ceiling or sweep period accepted (one year).
/// Keeps every `Instant + Duration` on the request path from overflowing.
pub const MAX_PERIOD_SECS: u64 = 365 * 24 * 60 * 60;

/// Admission control configuration for the authentication routes
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of requests admitted per window
    #[serde(default = "default_requests")]
    pub requests: u32,
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Exponential base of the backoff delay
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,
    /// Ceiling of the backoff delay in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Period of the background sweep that evicts idle records
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Path parameters carrying the subject identifier, checked in order
    #[serde(default = "default_subject_params")]
    pub subject_params: Vec<String>,
    /// JSON body field carrying the subject identifier
    #[serde(default = "default_subject_body_field")]
    pub subject_body_field: String,
    /// Route prefix the admission middleware is mounted on
    #[serde(default = "default_protected_prefix")]
    pub protected_prefix: String,
}

fn default_requests() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_backoff_base() -> u32 {
    2
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_subject_params() -> Vec<String> {
    vec!["supiOrSuci".to_string(), "supi".to_string()]
}

fn default_subject_body_field() -> String {
    "supiOrSuci".to_string()
}

fn default_protected_prefix() -> String {
    "/nudm-ueau/v1".to_string()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            window_secs: default_window_secs(),
            backoff_base: default_backoff_base(),
            max_backoff_secs: default_max_backoff_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            subject_params: default_subject_params(),
            subject_body_field: default_subject_body_field(),
            protected_prefix: default_protected_prefix(),
        }
    }
}

impl RateLimitConfig {
    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Get the backoff ceiling as a Duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Get the sweep period as a Duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.requests == 0 {
            return Err(GatewayError::Config(
                "Rate limit requests must be > 0".to_string(),
            ));
        }
        if self.window_secs == 0 {
            return Err(GatewayError::Config(
                "Rate limit window must be > 0".to_string(),
            ));
        }
        if self.backoff_base < 2 {
            return Err(GatewayError::Config(
                "Backoff base must be >= 2".to_string(),
            ));
        }
        if self.max_backoff_secs == 0 {
            return Err(GatewayError::Config(
                "Maximum backoff must be > 0".to_string(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(GatewayError::Config(
                "Cleanup interval must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("window_secs", self.window_secs),
            ("max_backoff_secs", self.max_backoff_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
        ] {
            if value > MAX_PERIOD_SECS {
                return Err(GatewayError::Config(format!(
                    "Rate limit {} must be <= {} (one year), got {}",
                    name, MAX_PERIOD_SECS, value
                )));
            }
        }
        if self.subject_params.iter().any(|p| p.is_empty()) {
            return Err(GatewayError::Config(
                "Subject path parameter names cannot be empty".to_string(),
            ));
        }
        if !self.protected_prefix.starts_with('/') || self.protected_prefix.ends_with('/') {
            return Err(GatewayError::Config(format!(
                "Protected prefix must start with '/' and not end with one: {}",
                self.protected_prefix
            )));
        }
        Ok(())
    }
}

/// Counting and backoff state for one identifier.
///
/// Owned exclusively by the limiter store; every read-modify-write happens
/// under the store lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Resolved rate-limit key
    pub identifier: String,
    /// Requests counted in the current window
    pub window_count: u32,
    /// Instant after which the window restarts
    pub window_reset_at: Instant,
    /// Consecutive rejections since the last backoff expiry
    pub failure_count: u32,
    /// Lockout deadline, if a backoff is recorded
    pub backoff_until: Option<Instant>,
}

impl RateLimitRecord {
    /// Fresh record with an empty window starting at `now`
    pub fn new(identifier: impl Into<String>, now: Instant, window: Duration) -> Self {
        Self {
            identifier: identifier.into(),
            window_count: 0,
            window_reset_at: now + window,
            failure_count: 0,
            backoff_until: None,
        }
    }

    /// Whether the current window has elapsed
    pub fn window_elapsed(&self, now: Instant) -> bool {
        now > self.window_reset_at
    }

    /// Whether a recorded backoff is still in force
    pub fn backoff_active(&self, now: Instant) -> bool {
        self.backoff_until.is_some_and(|until| now < until)
    }

    /// Eligible for removal by the sweeper: window elapsed and no active backoff
    pub fn is_expired(&self, now: Instant) -> bool {
        self.window_elapsed(now) && !self.backoff_active(now)
    }
}

/// Why a request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The identifier is serving a backoff lockout
    Backoff,
    /// The window quota is exhausted
    WindowExceeded,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Backoff => "backoff",
            RejectionReason::WindowExceeded => "window",
        }
    }
}

/// Rate limit result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Total limit
    pub limit: u32,
    /// When the window resets (whole seconds from now, rounded up)
    pub reset_after: u64,
    /// Retry after duration in whole seconds (for 429 responses)
    pub retry_after: Option<u64>,
    /// Set on rejections
    pub rejection: Option<RejectionReason>,
}

impl RateLimitResult {
    /// Create an allowed result
    pub fn allowed(remaining: u32, limit: u32, reset_after: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            limit,
            reset_after,
            retry_after: None,
            rejection: None,
        }
    }

    /// Create a denied result
    pub fn denied(
        reason: RejectionReason,
        remaining: u32,
        limit: u32,
        reset_after: u64,
        retry_after: u64,
    ) -> Self {
        Self {
            allowed: false,
            remaining,
            limit,
            reset_after,
            retry_after: Some(retry_after),
            rejection: Some(reason),
        }
    }
}

/// Whole seconds in `duration`, rounded up
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_config_defaults() {
        let config = RateLimitConfig::default();

        assert_eq!(config.requests, 10);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.max_backoff(), Duration::from_secs(300));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(config.subject_params, vec!["supiOrSuci", "supi"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rate_limit_config_validation() {
        let config = RateLimitConfig {
            backoff_base: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RateLimitConfig {
            window_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RateLimitConfig {
            protected_prefix: "nudm-ueau".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_config_rejects_unbounded_periods() {
        for config in [
            RateLimitConfig {
                window_secs: u64::MAX,
                ..Default::default()
            },
            RateLimitConfig {
                max_backoff_secs: u64::MAX,
                ..Default::default()
            },
            RateLimitConfig {
                cleanup_interval_secs: MAX_PERIOD_SECS + 1,
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err(), "{:?} accepted", config);
        }

        let config = RateLimitConfig {
            window_secs: MAX_PERIOD_SECS,
            max_backoff_secs: MAX_PERIOD_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_record_expiry() {
        let now = Instant::now();
        let window = Duration::from_secs(60);
        let mut record = RateLimitRecord::new("10.0.0.1", now, window);

        assert!(!record.is_expired(now));
        assert!(!record.is_expired(now + window));
        assert!(record.is_expired(now + window + Duration::from_millis(1)));

        record.backoff_until = Some(now + Duration::from_secs(120));
        assert!(!record.is_expired(now + Duration::from_secs(90)));
        assert!(record.is_expired(now + Duration::from_secs(120)));
    }

    #[test]
    fn test_rate_limit_result() {
        let allowed = RateLimitResult::allowed(5, 10, 30);
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining, 5);
        assert_eq!(allowed.rejection, None);

        let denied = RateLimitResult::denied(RejectionReason::WindowExceeded, 0, 10, 30, 2);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(2));
        assert_eq!(denied.rejection.map(|r| r.as_str()), Some("window"));
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(2000)), 2);
        assert_eq!(ceil_secs(Duration::from_millis(2001)), 3);
    }
}
