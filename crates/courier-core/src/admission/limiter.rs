//! Per-category token bucket limiter.
//!
//! Refill is computed lazily on each call from elapsed wall time, so no
//! background timer exists and the limiter is safe to drive from a single
//! dispatch loop. Unconfigured categories are unlimited: absence of
//! configuration must never silently block work.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::Category;
use crate::ports::Clock;

/// Static per-category quota: `burst` is the bucket capacity, refill rate
/// is derived from the hourly quota.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub quota_per_hour: f64,
    pub burst: u32,
}

impl RateLimitConfig {
    fn refill_per_ms(&self) -> f64 {
        self.quota_per_hour / 3_600_000.0
    }
}

/// Outcome of one admission check. `remaining: None` means the category
/// has no configured quota (unlimited).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: Option<f64>,
}

impl Admission {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: None,
        }
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_ms: f64,
    last_refill_at: DateTime<Utc>,
}

impl TokenBucket {
    fn new(config: RateLimitConfig, now: DateTime<Utc>) -> Self {
        let capacity = f64::from(config.burst);
        Self {
            capacity,
            tokens: capacity, // starts full: burst is available immediately
            refill_per_ms: config.refill_per_ms(),
            last_refill_at: now,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed_ms = (now - self.last_refill_at).num_milliseconds().max(0) as f64;
        self.tokens = (self.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
        self.last_refill_at = now;
    }

    /// Take `cost` tokens if available. On denial the token count is left
    /// untouched (beyond the lazy refill).
    fn try_take(&mut self, cost: f64, now: DateTime<Utc>) -> bool {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// Registry of token buckets, one per configured category.
///
/// Owned by a single dispatcher instance; independent dispatchers must
/// construct their own so they never share mutable state.
pub struct TokenBucketLimiter {
    configs: HashMap<Category, RateLimitConfig>,
    buckets: HashMap<Category, TokenBucket>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    pub fn new(configs: HashMap<Category, RateLimitConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            configs,
            buckets: HashMap::new(),
            clock,
        }
    }

    /// Consult and, if allowed, consume `cost` tokens for the category.
    pub fn try_take(&mut self, category: &Category, cost: f64) -> Admission {
        let Some(config) = self.configs.get(category) else {
            return Admission::unlimited();
        };

        let now = self.clock.now();
        let bucket = self
            .buckets
            .entry(category.clone())
            .or_insert_with(|| TokenBucket::new(*config, now));

        let allowed = bucket.try_take(cost, now);
        Admission {
            allowed,
            remaining: Some(bucket.tokens),
        }
    }

    /// Clear bucket state for one category (bucket refills from full).
    ///
    /// Used after a terminal non-retryable failure: a caller-side bug
    /// should not keep consuming future budget.
    pub fn reset(&mut self, category: &Category) {
        self.buckets.remove(category);
    }

    pub fn reset_all(&mut self) {
        self.buckets.clear();
    }

    /// Drain the category's bucket to zero (adaptive throttling: the
    /// downstream told us to slow down, so admission resumes only after
    /// refill).
    pub fn penalize(&mut self, category: &Category) {
        let Some(config) = self.configs.get(category) else {
            return; // unlimited category, nothing to drain
        };
        let now = self.clock.now();
        let bucket = self
            .buckets
            .entry(category.clone())
            .or_insert_with(|| TokenBucket::new(*config, now));
        bucket.tokens = 0.0;
        bucket.last_refill_at = now;
    }
}
