use super::backoff::{self, BackoffPolicy};
use super::clock::{Clock, SystemClock};
use super::types::{ceil_secs, RateLimitConfig, RateLimitRecord, RateLimitResult, RejectionReason};
use super::window;
use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// In-memory store of per-identifier rate limit records.
///
/// One mutex guards the whole map. Every decision for a request runs as a
/// single critical section, so two concurrent requests for the same
/// identifier can never both observe the pre-increment count.
#[derive(Debug)]
pub struct LimiterStore {
    config: RateLimitConfig,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl LimiterStore {
    /// Create a store reading the system clock
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store with a custom time source
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy: BackoffPolicy::from_config(&config),
            config,
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether a request for `identifier` is admitted.
    ///
    /// A locked identifier is rejected without touching its window and the
    /// rejection extends the lockout. Otherwise the request is counted; going
    /// over the limit is a rejection that starts a lockout.
    pub fn evaluate(&self, identifier: &str) -> RateLimitResult {
        let now = self.clock.now();
        let limit = self.config.requests;
        let window = self.config.window();

        let (result, applied) = {
            let mut records = self.records.lock();
            let record = records
                .entry(identifier.to_string())
                .or_insert_with(|| RateLimitRecord::new(identifier, now, window));

            if backoff::is_locked(record, now) {
                let delay = backoff::record_failure(record, now, &self.policy);
                let result = RateLimitResult::denied(
                    RejectionReason::Backoff,
                    window::remaining(record, now, limit),
                    limit,
                    reset_after(record, now),
                    retry_after(record, now),
                );
                (result, Some((delay, record.failure_count)))
            } else {
                let outcome = window::admit(record, now, limit, window);
                let reset_after = ceil_secs(outcome.reset_at.saturating_duration_since(now));

                if outcome.allowed {
                    (
                        RateLimitResult::allowed(outcome.remaining, limit, reset_after),
                        None,
                    )
                } else {
                    let delay = backoff::record_failure(record, now, &self.policy);
                    let result = RateLimitResult::denied(
                        RejectionReason::WindowExceeded,
                        outcome.remaining,
                        limit,
                        reset_after,
                        retry_after(record, now),
                    );
                    (result, Some((delay, record.failure_count)))
                }
            }
        };

        if let Some((delay, failures)) = applied {
            log_backoff(identifier, delay, failures);
        }

        result
    }

    /// Whether `identifier` is locked out, clearing an elapsed lockout
    pub fn is_locked(&self, identifier: &str) -> bool {
        let now = self.clock.now();
        let mut records = self.records.lock();
        records
            .get_mut(identifier)
            .is_some_and(|record| backoff::is_locked(record, now))
    }

    /// Count a request against the window without consulting the backoff
    pub fn admit(&self, identifier: &str) -> RateLimitResult {
        let now = self.clock.now();
        let limit = self.config.requests;
        let window = self.config.window();

        let mut records = self.records.lock();
        let record = records
            .entry(identifier.to_string())
            .or_insert_with(|| RateLimitRecord::new(identifier, now, window));
        let outcome = window::admit(record, now, limit, window);
        let reset_after = ceil_secs(outcome.reset_at.saturating_duration_since(now));

        if outcome.allowed {
            RateLimitResult::allowed(outcome.remaining, limit, reset_after)
        } else {
            RateLimitResult::denied(
                RejectionReason::WindowExceeded,
                outcome.remaining,
                limit,
                reset_after,
                ceil_secs(outcome.reset_at.saturating_duration_since(now)).max(1),
            )
        }
    }

    /// Record a rejection for `identifier` and return the applied delay
    pub fn record_failure(&self, identifier: &str) -> Duration {
        let now = self.clock.now();
        let window = self.config.window();

        let (delay, failures) = {
            let mut records = self.records.lock();
            let record = records
                .entry(identifier.to_string())
                .or_insert_with(|| RateLimitRecord::new(identifier, now, window));
            let delay = backoff::record_failure(record, now, &self.policy);
            (delay, record.failure_count)
        };

        log_backoff(identifier, delay, failures);
        delay
    }

    /// Evict records whose window has elapsed and whose backoff is not
    /// active. Returns the number of evicted records.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        let evicted = before - records.len();

        metrics::record_tracked_identifiers(records.len());
        evicted
    }

    /// Snapshot of the record for `identifier`
    pub fn record(&self, identifier: &str) -> Option<RateLimitRecord> {
        self.records.lock().get(identifier).cloned()
    }

    /// Number of tracked identifiers
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Start the periodic sweep on the current runtime
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                interval_secs = interval.as_secs(),
                "Started rate limit sweeper"
            );

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep();
                        if evicted > 0 {
                            debug!(
                                evicted = evicted,
                                tracked = self.len(),
                                "Rate limit sweeper evicted idle records"
                            );
                        }
                    }
                }
            }

            debug!("Rate limit sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Owner of the background sweep task
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Rate limit sweeper ended abnormally");
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

fn reset_after(record: &RateLimitRecord, now: Instant) -> u64 {
    if record.window_elapsed(now) {
        0
    } else {
        ceil_secs(record.window_reset_at.saturating_duration_since(now))
    }
}

fn retry_after(record: &RateLimitRecord, now: Instant) -> u64 {
    record
        .backoff_until
        .map(|until| ceil_secs(until.saturating_duration_since(now)))
        .unwrap_or(0)
        .max(1)
}

fn log_backoff(identifier: &str, delay: Duration, failures: u32) {
    info!(
        identifier = %identifier,
        backoff_ms = delay.as_millis() as u64,
        failures = failures,
        "Rate limit backoff applied"
    );
}
