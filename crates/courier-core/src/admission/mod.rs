//! Admission control: allow or deny a unit of work before it consumes
//! downstream capacity.
//!
//! Two gates, consulted in order by the dispatcher:
//! - **TokenBucketLimiter**: per-category throughput ceiling. Denial is a
//!   deferral, not a failure (the job waits, nothing is counted).
//! - **CircuitBreaker**: per-dependency fault isolator. Denial is an
//!   immediate retryable failure ("we chose not to call").
//!
//! Both are plain mutable state owned by the dispatcher and touched only
//! inside its single-threaded loop; no locks required.

pub mod breaker;
pub mod limiter;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use limiter::{Admission, RateLimitConfig, TokenBucketLimiter};
