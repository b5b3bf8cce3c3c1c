//! Reconnection policy with bounded exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;

use crate::constants::{
    MAX_RETRIES, MAX_RETRY_DELAY_SECS, RECONNECT_BASE_DELAY_MS, RECONNECT_JITTER_MS,
};

/// Configuration for reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectionPolicy {
    /// Delay before the first reconnect, doubled on every further failure
    pub base_delay: Duration,
    /// Upper bound of the uniform random delay added on top
    pub jitter_max: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Consecutive failed attempts after which the session gives up
    pub max_attempts: u32,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(RECONNECT_BASE_DELAY_MS),
            jitter_max: Duration::from_millis(RECONNECT_JITTER_MS),
            max_delay: Duration::from_secs(MAX_RETRY_DELAY_SECS),
            max_attempts: MAX_RETRIES,
        }
    }
}

/// Bookkeeping for the current run of consecutive failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectAttempt {
    pub account_id: String,
    pub attempt_count: u32,
    pub next_delay: Duration,
}

/// What to do after a connection failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(ReconnectAttempt),
    Exhausted { attempts: u32 },
}

impl ReconnectionPolicy {
    pub fn new(
        base_delay: Duration,
        jitter_max: Duration,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            jitter_max,
            max_delay,
            max_attempts,
        }
    }

    /// `min(base * 2^prior_failures + jitter, max_delay)`
    pub fn delay_for(&self, prior_failures: u32, jitter: Duration) -> Duration {
        let factor = 2u32.saturating_pow(prior_failures);
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter_max.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..self.jitter_max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Register one more failure.
    ///
    /// `current` is the running attempt record (None after a success). It is
    /// updated in place on retry and cleared when the policy gives up.
    pub fn on_failure(
        &self,
        current: &mut Option<ReconnectAttempt>,
        account_id: &str,
    ) -> RetryDecision {
        let prior = current.as_ref().map_or(0, |a| a.attempt_count);
        if prior >= self.max_attempts {
            *current = None;
            return RetryDecision::Exhausted { attempts: prior };
        }

        // Jitter larger than the doubling step must not shorten the wait
        let floor = current.as_ref().map_or(Duration::ZERO, |a| a.next_delay);
        let next_delay = self
            .delay_for(prior, self.sample_jitter())
            .max(floor)
            .min(self.max_delay);

        let attempt = ReconnectAttempt {
            account_id: account_id.to_string(),
            attempt_count: prior + 1,
            next_delay,
        };
        *current = Some(attempt.clone());
        RetryDecision::Retry(attempt)
    }
}
