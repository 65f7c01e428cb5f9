//! Request admission layer: circuit breaker and sliding-window rate limiter.
//!
//! Both components are synchronous and endpoint-keyed. Callers run a
//! [`CircuitBreaker::check`] and [`RateLimiter::check`] before forwarding a
//! request, then report the outcome back via `record_success` /
//! `record_failure`.

pub mod breaker;
pub mod error;
pub mod limiter;

pub use breaker::{BreakerConfig, BreakerState, BreakerStatus, CircuitBreaker};
pub use error::{GatewayError, Result};
pub use limiter::{RateLimitDecision, RateLimitRule, RateLimiter};
