//! Admission control for authentication-sensitive routes
//!
//! Combines two independent mechanisms over one in-memory store:
//!
//! - **Fixed window**: at most `requests` admissions per identifier per window
//! - **Exponential backoff**: every limiter-level rejection locks the
//!   identifier out for `min(base^failures * 1s, max_backoff)`
//!
//! The identifier is the client address, qualified by the subscriber
//! identifier (`address:subject`) when the request names one, so one client
//! is not penalised for another subject's failures.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nudm_gateway::rate_limit::{LimiterStore, RateLimitConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RateLimitConfig::default();
//!     let store = Arc::new(LimiterStore::new(config.clone()));
//!     let sweeper = store.clone().spawn_sweeper(config.cleanup_interval());
//!
//!     let result = store.evaluate("192.168.1.1:imsi-001010000000001");
//!     assert!(result.allowed);
//!
//!     sweeper.shutdown().await;
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod identifier;
pub mod middleware;
pub mod store;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use identifier::{IdentifierResolver, UNKNOWN_CLIENT};
pub use middleware::{add_rate_limit_headers, rate_limit_middleware, RateLimitMiddleware};
pub use store::{LimiterStore, SweeperHandle};
pub use types::{RateLimitConfig, RateLimitRecord, RateLimitResult, RejectionReason};
