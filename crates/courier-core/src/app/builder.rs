//! DispatcherBuilder - construction and wiring with fail-fast validation.
//!
//! Misconfiguration (zero attempts, negative jitter, ...) is rejected at
//! `build()` time with a clear error instead of surfacing as weird
//! behavior on the first dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::admission::{BreakerConfig, BreakerRegistry, RateLimitConfig, TokenBucketLimiter};
use crate::app::dispatcher::{DispatchConfig, Dispatcher};
use crate::domain::Category;
use crate::impls::NoopSessionInvalidator;
use crate::ports::{AckSink, Clock, SessionInvalidator, SystemClock, Transport};
use crate::queue::{DispatchQueue, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("an AckSink is required: the core must never fail silently")]
    MissingAckSink,

    #[error("retry.max_attempts must be >= 1 (got {0})")]
    ZeroMaxAttempts(u32),

    #[error("retry.jitter_factor must be >= 0 (got {0})")]
    NegativeJitter(f64),

    #[error("retry.multiplier must be >= 1 (got {0})")]
    ShrinkingBackoff(f64),

    #[error("retry.base_delay {0:?} exceeds retry.max_delay {1:?}")]
    DelayBoundsInverted(Duration, Duration),

    #[error("breaker.{0} must be >= 1")]
    ZeroBreakerThreshold(&'static str),

    #[error("rate limit for category '{0}' must have burst >= 1 and quota > 0")]
    InvalidRateLimit(Category),
}

pub struct DispatcherBuilder {
    transport: Arc<dyn Transport>,
    ack_sink: Option<Arc<dyn AckSink>>,
    session_invalidator: Arc<dyn SessionInvalidator>,
    clock: Arc<dyn Clock>,
    rate_limits: HashMap<Category, RateLimitConfig>,
    retry: RetryPolicy,
    breaker: BreakerConfig,
    config: DispatchConfig,
}

impl DispatcherBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            ack_sink: None,
            session_invalidator: Arc::new(NoopSessionInvalidator),
            clock: Arc::new(SystemClock),
            rate_limits: HashMap::new(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            config: DispatchConfig::default(),
        }
    }

    pub fn ack_sink(mut self, sink: Arc<dyn AckSink>) -> Self {
        self.ack_sink = Some(sink);
        self
    }

    pub fn session_invalidator(mut self, invalidator: Arc<dyn SessionInvalidator>) -> Self {
        self.session_invalidator = invalidator;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configure a throughput ceiling for one category. Categories never
    /// configured stay unlimited.
    pub fn rate_limit(mut self, category: impl Into<Category>, config: RateLimitConfig) -> Self {
        self.rate_limits.insert(category.into(), config);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn breaker(mut self, config: BreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Fixed short delay before re-checking admission when the limiter
    /// denies the head job.
    pub fn throttle_deferral(mut self, delay: Duration) -> Self {
        self.config.throttle_deferral = delay;
        self
    }

    /// Environment-level feature flag. When disabled, limiter and breaker
    /// are bypassed and every result event carries `bypassed: true`.
    pub fn admission_enabled(mut self, enabled: bool) -> Self {
        self.config.admission_enabled = enabled;
        self
    }

    /// Adaptive throttling: drain the local bucket when the downstream
    /// itself answers RATE_LIMITED.
    pub fn shrink_on_rate_limited(mut self, enabled: bool) -> Self {
        self.config.shrink_on_rate_limited = enabled;
        self
    }

    pub fn build(self) -> Result<Dispatcher, BuildError> {
        let ack_sink = self.ack_sink.ok_or(BuildError::MissingAckSink)?;

        if self.retry.max_attempts == 0 {
            return Err(BuildError::ZeroMaxAttempts(self.retry.max_attempts));
        }
        if self.retry.jitter_factor < 0.0 {
            return Err(BuildError::NegativeJitter(self.retry.jitter_factor));
        }
        if self.retry.multiplier < 1.0 {
            return Err(BuildError::ShrinkingBackoff(self.retry.multiplier));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(BuildError::DelayBoundsInverted(
                self.retry.base_delay,
                self.retry.max_delay,
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(BuildError::ZeroBreakerThreshold("failure_threshold"));
        }
        if self.breaker.success_threshold == 0 {
            return Err(BuildError::ZeroBreakerThreshold("success_threshold"));
        }
        if self.breaker.half_open_max_calls == 0 {
            return Err(BuildError::ZeroBreakerThreshold("half_open_max_calls"));
        }
        for (category, limit) in &self.rate_limits {
            if limit.burst == 0 || limit.quota_per_hour <= 0.0 {
                return Err(BuildError::InvalidRateLimit(category.clone()));
            }
        }

        let queue = Arc::new(DispatchQueue::new(self.clock.clone()));
        let limiter = TokenBucketLimiter::new(self.rate_limits, self.clock.clone());
        let breakers = BreakerRegistry::new(self.breaker, self.clock);

        Ok(Dispatcher::new(
            queue,
            self.transport,
            ack_sink,
            self.session_invalidator,
            limiter,
            breakers,
            self.retry,
            self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, TransportFailure};
    use crate::impls::MemoryAckSink;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _job: &Job) -> Result<serde_json::Value, TransportFailure> {
            Ok(serde_json::json!({}))
        }
    }

    fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new(Arc::new(NullTransport))
            .ack_sink(Arc::new(MemoryAckSink::new()))
    }

    #[test]
    fn default_wiring_builds() {
        assert!(builder().build().is_ok());
    }

    #[test]
    fn missing_ack_sink_is_rejected() {
        let result = DispatcherBuilder::new(Arc::new(NullTransport)).build();
        assert!(matches!(result, Err(BuildError::MissingAckSink)));
    }

    #[test]
    fn zero_max_attempts_is_rejected() {
        let result = builder()
            .retry(RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            })
            .build();
        assert!(matches!(result, Err(BuildError::ZeroMaxAttempts(0))));
    }

    #[test]
    fn inverted_delay_bounds_are_rejected() {
        let result = builder()
            .retry(RetryPolicy {
                base_delay: Duration::from_secs(120),
                max_delay: Duration::from_secs(60),
                ..RetryPolicy::default()
            })
            .build();
        assert!(matches!(result, Err(BuildError::DelayBoundsInverted(_, _))));
    }

    #[test]
    fn zero_breaker_threshold_is_rejected() {
        let result = builder()
            .breaker(BreakerConfig {
                failure_threshold: 0,
                ..BreakerConfig::default()
            })
            .build();
        assert!(matches!(
            result,
            Err(BuildError::ZeroBreakerThreshold("failure_threshold"))
        ));
    }

    #[test]
    fn zero_burst_rate_limit_is_rejected() {
        let result = builder()
            .rate_limit(
                "dm",
                RateLimitConfig {
                    quota_per_hour: 100.0,
                    burst: 0,
                },
            )
            .build();
        assert!(matches!(result, Err(BuildError::InvalidRateLimit(_))));
    }
}
