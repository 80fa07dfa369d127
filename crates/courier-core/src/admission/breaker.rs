//! Circuit breaker: per-dependency fault isolator.
//!
//! Explicit state machine, transitions monotonic within a cycle:
//! - Closed -> Open after `failure_threshold` consecutive failures
//! - Open -> HalfOpen on the first acquire after `cooldown_ms`
//! - HalfOpen -> Closed after `success_threshold` consecutive probe successes
//! - HalfOpen -> Open on any probe failure (fresh `opened_at`)
//!
//! Denial ("we chose not to call") is distinct from a downstream-reported
//! failure; the dispatcher reports it as a retryable `CIRCUIT_OPEN` result
//! without burning an attempt.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::Clock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: i64,
    pub success_threshold: u32,

    /// Probe concurrency bound while half-open. With a single dispatch
    /// loop this is effectively 1, but the bound is enforced regardless.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    half_open_probes_in_flight: u32,
    probe_successes: u32,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_probes_in_flight: 0,
            probe_successes: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// May this call go downstream? Every admitted call must be balanced
    /// by exactly one `on_success`, `on_failure`, or `release`.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let opened_at = match self.opened_at {
                    Some(t) => t,
                    None => {
                        // Open without a timestamp cannot happen via the
                        // public API; treat it as "cooldown elapsed".
                        now - Duration::milliseconds(self.config.cooldown_ms)
                    }
                };
                if now - opened_at >= Duration::milliseconds(self.config.cooldown_ms) {
                    // The *next* call becomes the probe.
                    self.state = BreakerState::HalfOpen;
                    self.probe_successes = 0;
                    self.half_open_probes_in_flight = 1;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if self.half_open_probes_in_flight < self.config.half_open_max_calls {
                    self.half_open_probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&mut self) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                self.half_open_probes_in_flight = self.half_open_probes_in_flight.saturating_sub(1);
                self.probe_successes += 1;
                if self.probe_successes >= self.config.success_threshold {
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                    self.opened_at = None;
                    self.probe_successes = 0;
                    self.half_open_probes_in_flight = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&mut self, now: DateTime<Utc>) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.open(now);
                }
            }
            // Any probe failure reopens immediately with a fresh cooldown.
            BreakerState::HalfOpen => self.open(now),
            BreakerState::Open => {}
        }
    }

    /// Return an admitted slot without recording an outcome: the external
    /// call was never made (e.g. the job was cancelled after admission).
    /// Without this a half-open probe slot would leak and the breaker
    /// could deny every subsequent call.
    pub fn release(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.half_open_probes_in_flight = self.half_open_probes_in_flight.saturating_sub(1);
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.probe_successes = 0;
        self.half_open_probes_in_flight = 0;
    }
}

/// Per-dependency breakers, keyed by `Transport::dependency()`.
///
/// Owned by one dispatcher instance. Deliberately not a process-wide
/// singleton, so independent dispatchers (and tests) never interfere.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: HashMap<String, CircuitBreaker>,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            breakers: HashMap::new(),
            clock,
        }
    }

    pub fn try_acquire(&mut self, dependency: &str) -> bool {
        let now = self.clock.now();
        self.breaker_mut(dependency).try_acquire(now)
    }

    pub fn on_success(&mut self, dependency: &str) {
        self.breaker_mut(dependency).on_success();
    }

    pub fn on_failure(&mut self, dependency: &str) {
        let now = self.clock.now();
        self.breaker_mut(dependency).on_failure(now);
    }

    pub fn release(&mut self, dependency: &str) {
        self.breaker_mut(dependency).release();
    }

    pub fn state(&mut self, dependency: &str) -> BreakerState {
        self.breaker_mut(dependency).state()
    }

    fn breaker_mut(&mut self, dependency: &str) -> &mut CircuitBreaker {
        let config = self.config;
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| CircuitBreaker::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn breaker(failure_threshold: u32, cooldown_ms: i64, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold,
            cooldown_ms,
            success_threshold,
            half_open_max_calls: 1,
        })
    }

    #[test]
    fn scenario_d_opens_after_threshold_and_denies_without_calling() {
        let mut b = breaker(5, 30_000, 2);
        let now = t0();

        for _ in 0..5 {
            assert!(b.try_acquire(now));
            b.on_failure(now);
        }
        assert_eq!(b.state(), BreakerState::Open);

        // 6th call denied before cooldown, no downstream call made.
        assert!(!b.try_acquire(now + Duration::milliseconds(29_999)));
    }

    #[test]
    fn exactly_the_next_call_after_cooldown_is_the_probe() {
        let mut b = breaker(1, 10_000, 1);
        let now = t0();

        assert!(b.try_acquire(now));
        b.on_failure(now);
        assert_eq!(b.state(), BreakerState::Open);

        let after = now + Duration::milliseconds(10_000);
        assert!(b.try_acquire(after), "first call after cooldown is the probe");
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // Probe still in flight: concurrent calls stay bounded.
        assert!(!b.try_acquire(after));
    }

    #[test]
    fn probe_successes_close_the_breaker() {
        let mut b = breaker(1, 1_000, 2);
        let now = t0();

        b.try_acquire(now);
        b.on_failure(now);

        let after = now + Duration::milliseconds(1_000);
        assert!(b.try_acquire(after));
        b.on_success();
        assert_eq!(b.state(), BreakerState::HalfOpen, "one success is not enough");

        assert!(b.try_acquire(after));
        b.on_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire(after));
    }

    #[test]
    fn probe_failure_reopens_with_fresh_cooldown() {
        let mut b = breaker(1, 1_000, 1);
        let now = t0();

        b.try_acquire(now);
        b.on_failure(now);

        let probe_at = now + Duration::milliseconds(1_000);
        assert!(b.try_acquire(probe_at));
        b.on_failure(probe_at);
        assert_eq!(b.state(), BreakerState::Open);

        // Cooldown restarts from the probe failure, not the original open.
        assert!(!b.try_acquire(probe_at + Duration::milliseconds(999)));
        assert!(b.try_acquire(probe_at + Duration::milliseconds(1_000)));
    }

    #[test]
    fn released_probe_slot_can_be_reacquired() {
        let mut b = breaker(1, 1_000, 1);
        let now = t0();

        b.try_acquire(now);
        b.on_failure(now);

        let after = now + Duration::milliseconds(1_000);
        assert!(b.try_acquire(after), "probe slot taken");
        assert!(!b.try_acquire(after), "only one probe at a time");

        // The admitted call never went downstream (job cancelled): the
        // slot comes back and the next call can probe instead.
        b.release();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.try_acquire(after), "released slot is available again");

        b.on_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn release_while_closed_is_a_noop() {
        let mut b = breaker(2, 1_000, 1);
        let now = t0();

        assert!(b.try_acquire(now));
        b.release();
        b.on_failure(now);
        assert_eq!(b.state(), BreakerState::Closed, "one failure, threshold two");
    }

    #[test]
    fn success_resets_consecutive_failures_while_closed() {
        let mut b = breaker(3, 1_000, 1);
        let now = t0();

        b.on_failure(now);
        b.on_failure(now);
        b.on_success();
        b.on_failure(now);
        b.on_failure(now);
        assert_eq!(b.state(), BreakerState::Closed, "failures were not consecutive");

        b.on_failure(now);
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn registry_isolates_dependencies() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut reg = BreakerRegistry::new(
            BreakerConfig {
                failure_threshold: 1,
                ..BreakerConfig::default()
            },
            clock,
        );

        reg.try_acquire("of-api");
        reg.on_failure("of-api");
        assert_eq!(reg.state("of-api"), BreakerState::Open);
        assert_eq!(reg.state("instagram"), BreakerState::Closed);
        assert!(reg.try_acquire("instagram"));
    }
}
