//! Retry policy: backoff delays and attempt admission.

use std::time::Duration;

use rand::Rng;

use crate::domain::Failure;

/// Immutable retry configuration.
///
/// Delay grows as `base_delay * multiplier^(attempt - 1)`, capped at
/// `max_delay`, then jitter is applied by sampling uniformly in
/// `[delay, delay * (1 + jitter_factor)]` so many jobs failing together
/// do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed per job (first try included).
    pub max_attempts: u32,

    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,

    /// 0.0 disables jitter; 0.2 means up to +20%.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Retry iff the failure is retryable and the budget has room.
    pub fn should_retry(&self, failure: &Failure, attempt: u32) -> bool {
        failure.retryable() && attempt < self.max_attempts
    }

    /// Delay before the retry that follows `attempt` (1-indexed).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let uncapped = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = uncapped.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter_factor > 0.0 {
            rand::thread_rng().gen_range(capped..=capped * (1.0 + self.jitter_factor))
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }
}
