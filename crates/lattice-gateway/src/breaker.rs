//! Endpoint circuit breaker with consecutive-count semantics.
//!
//! A breaker opens on the Nth consecutive failure, rejects requests for a
//! recovery period, then admits trial traffic in half-open state until a run
//! of consecutive successes closes it again.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit state for a single endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Rejecting requests until the recovery timeout elapses.
    Open,
    /// Admitting trial requests after the recovery timeout.
    HalfOpen,
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects before going half-open.
    pub recovery_timeout: Duration,
    /// Consecutive successes that close a half-open circuit.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

/// Point-in-time view of one endpoint's breaker.
#[derive(Debug, Clone)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Seconds until an open circuit admits trial traffic, if open.
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug)]
struct EndpointBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl EndpointBreaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }
}

/// Per-endpoint circuit breakers behind a single lock.
pub struct CircuitBreaker {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, EndpointBreaker>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("endpoint_count", &self.breakers.read().map(|b| b.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Creates a breaker set with the given tuning.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, breakers: RwLock::new(HashMap::new()) }
    }

    /// Admission check for an endpoint.
    ///
    /// An open circuit whose recovery timeout has elapsed transitions to
    /// half-open and admits the request.
    ///
    /// # Errors
    /// Returns [`GatewayError::CircuitOpen`] while the circuit is open.
    pub fn check(&self, endpoint: &str) -> Result<()> {
        let mut breakers = self.breakers.write().unwrap();
        let breaker = breakers.entry(endpoint.to_string()).or_insert_with(EndpointBreaker::new);

        match breaker.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = breaker.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.recovery_timeout {
                    debug!(endpoint = %endpoint, "circuit transitioning to half-open");
                    breaker.state = BreakerState::HalfOpen;
                    breaker.consecutive_successes = 0;
                    Ok(())
                } else {
                    let remaining = self.config.recovery_timeout - elapsed;
                    Err(GatewayError::CircuitOpen {
                        endpoint: endpoint.to_string(),
                        retry_after_secs: remaining.as_secs(),
                    })
                }
            }
        }
    }

    /// Records a successful request for an endpoint.
    pub fn record_success(&self, endpoint: &str) {
        let mut breakers = self.breakers.write().unwrap();
        let breaker = breakers.entry(endpoint.to_string()).or_insert_with(EndpointBreaker::new);

        breaker.consecutive_failures = 0;
        breaker.consecutive_successes = breaker.consecutive_successes.saturating_add(1);

        if breaker.state == BreakerState::HalfOpen
            && breaker.consecutive_successes >= self.config.success_threshold
        {
            info!(endpoint = %endpoint, "circuit closed after successful trial requests");
            breaker.state = BreakerState::Closed;
            breaker.consecutive_successes = 0;
            breaker.opened_at = None;
        }
    }

    /// Records a failed request for an endpoint.
    pub fn record_failure(&self, endpoint: &str) {
        let mut breakers = self.breakers.write().unwrap();
        let breaker = breakers.entry(endpoint.to_string()).or_insert_with(EndpointBreaker::new);

        breaker.consecutive_successes = 0;
        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);

        match breaker.state {
            BreakerState::Closed => {
                if breaker.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        endpoint = %endpoint,
                        failures = breaker.consecutive_failures,
                        "circuit opened"
                    );
                    breaker.state = BreakerState::Open;
                    breaker.opened_at = Some(Instant::now());
                }
            }
            // A failed trial request reopens immediately
            BreakerState::HalfOpen => {
                warn!(endpoint = %endpoint, "circuit reopened after failed trial request");
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }

    /// Returns the current state for an endpoint, `Closed` if unseen.
    #[must_use]
    pub fn state(&self, endpoint: &str) -> BreakerState {
        self.breakers
            .read()
            .unwrap()
            .get(endpoint)
            .map_or(BreakerState::Closed, |b| b.state)
    }

    /// Point-in-time view of every tracked endpoint.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, BreakerStatus> {
        let breakers = self.breakers.read().unwrap();
        breakers
            .iter()
            .map(|(endpoint, b)| {
                let retry_after_secs = match (b.state, b.opened_at) {
                    (BreakerState::Open, Some(opened_at)) => Some(
                        self.config
                            .recovery_timeout
                            .saturating_sub(opened_at.elapsed())
                            .as_secs(),
                    ),
                    _ => None,
                };
                (
                    endpoint.clone(),
                    BreakerStatus {
                        state: b.state,
                        consecutive_failures: b.consecutive_failures,
                        consecutive_successes: b.consecutive_successes,
                        retry_after_secs,
                    },
                )
            })
            .collect()
    }

    /// Resets an endpoint back to closed with cleared counters.
    pub fn reset(&self, endpoint: &str) {
        let mut breakers = self.breakers.write().unwrap();
        breakers.insert(endpoint.to_string(), EndpointBreaker::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(50),
            success_threshold: 2,
        }
    }

    #[test]
    fn opens_on_consecutive_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.record_failure("/api");
        breaker.record_failure("/api");
        assert_eq!(breaker.state("/api"), BreakerState::Closed);
        breaker.record_failure("/api");
        assert_eq!(breaker.state("/api"), BreakerState::Open);
        assert!(breaker.check("/api").is_err());
    }

    #[test]
    fn success_resets_failure_streak() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.record_failure("/api");
        breaker.record_failure("/api");
        breaker.record_success("/api");
        breaker.record_failure("/api");
        breaker.record_failure("/api");
        // Streak broken by the success, still under threshold
        assert_eq!(breaker.state("/api"), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_recovery_timeout() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure("/api");
        }
        assert!(breaker.check("/api").is_err());
        sleep(Duration::from_millis(60));
        assert!(breaker.check("/api").is_ok());
        assert_eq!(breaker.state("/api"), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure("/api");
        }
        sleep(Duration::from_millis(60));
        assert!(breaker.check("/api").is_ok());
        breaker.record_success("/api");
        assert_eq!(breaker.state("/api"), BreakerState::HalfOpen);
        breaker.record_success("/api");
        assert_eq!(breaker.state("/api"), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure("/api");
        }
        sleep(Duration::from_millis(60));
        assert!(breaker.check("/api").is_ok());
        breaker.record_success("/api");
        breaker.record_failure("/api");
        assert_eq!(breaker.state("/api"), BreakerState::Open);
        assert!(breaker.check("/api").is_err());
    }

    #[test]
    fn endpoints_are_independent() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure("/llm/generate");
        }
        assert_eq!(breaker.state("/llm/generate"), BreakerState::Open);
        assert!(breaker.check("/agents").is_ok());
        assert_eq!(breaker.state("/agents"), BreakerState::Closed);
    }

    #[test]
    fn snapshot_reports_retry_window() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        for _ in 0..5 {
            breaker.record_failure("/api");
        }
        let snapshot = breaker.snapshot();
        let status = &snapshot["/api"];
        assert_eq!(status.state, BreakerState::Open);
        assert_eq!(status.consecutive_failures, 5);
        assert!(status.retry_after_secs.is_some_and(|s| s <= 60));
    }

    #[test]
    fn reset_closes_the_circuit() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure("/api");
        }
        breaker.reset("/api");
        assert_eq!(breaker.state("/api"), BreakerState::Closed);
        assert!(breaker.check("/api").is_ok());
    }
}
