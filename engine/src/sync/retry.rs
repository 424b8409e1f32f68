//! Retry policy and per-item retry bookkeeping.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff for transient failures.
///
/// Delays are deterministic so tests with paused time can predict them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Attempts per cycle, including the first
    pub max_attempts: u32,
    #[serde(rename = "initialDelayMs", with = "super::duration_millis")]
    pub initial_delay: Duration,
    #[serde(rename = "maxDelayMs", with = "super::duration_millis")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// A single attempt, never retried within a cycle.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Wait after the `failures`-th consecutive failure.
    ///
    /// Zero failures means no wait; the first failure waits `initial_delay`,
    /// each further one multiplies it, capped at `max_delay`.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.max(1.0).powi(failures as i32 - 1);
        let nanos = self.initial_delay.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }

    /// Whether another attempt is allowed after `failures` failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

/// Retry bookkeeping for one recipe or blob during a sync cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    /// Consecutive transient failures
    pub attempts: u32,
    /// Earliest time the next attempt may start
    pub next_eligible_at: Option<Instant>,
    pub last_error: Option<String>,
    /// Out of attempts; the work stays queued for the next cycle
    pub exhausted: bool,
}

impl RetryState {
    /// Record a transient failure at `now` and schedule the next attempt.
    ///
    /// Returns `false` when the policy has no attempts left.
    pub fn record_failure(&mut self, policy: &RetryPolicy, now: Instant, error: impl Into<String>) -> bool {
        self.attempts += 1;
        self.last_error = Some(error.into());
        if policy.allows_retry(self.attempts) {
            self.next_eligible_at = Some(now + policy.delay_for_attempt(self.attempts));
            true
        } else {
            self.next_eligible_at = None;
            self.exhausted = true;
            false
        }
    }

    pub fn is_eligible(&self, now: Instant) -> bool {
        !self.exhausted && self.next_eligible_at.map_or(true, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::new(10)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(350));
    }

    #[test]
    fn no_retry_allows_one_attempt() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.allows_retry(1));
    }

    #[tokio::test(start_paused = true)]
    async fn state_exhausts_after_max_attempts() {
        let policy = RetryPolicy::new(2).with_initial_delay(Duration::from_millis(10));
        let mut state = RetryState::default();
        let now = Instant::now();

        assert!(state.is_eligible(now));
        assert!(state.record_failure(&policy, now, "timeout"));
        assert!(!state.is_eligible(now));
        assert!(state.is_eligible(now + Duration::from_millis(10)));

        assert!(!state.record_failure(&policy, now, "timeout"));
        assert!(state.exhausted);
        assert_eq!(state.attempts, 2);
        assert_eq!(state.last_error.as_deref(), Some("timeout"));
    }
}
