//! Sliding-window rate limiter keyed by endpoint pattern rules.
//!
//! Rules match endpoints by substring (or `"*"` for everything). When several
//! rules match, the most restrictive one (lowest per-minute limit) applies.
//! Counting windows are per `(rule, tenant?, user?)` scope, so tenant-specific
//! rules never let one tenant exhaust another's budget.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A rate limit rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Unique rule identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Endpoint substring pattern, `"*"` matches every endpoint.
    pub pattern: String,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: u32,
    /// Short-burst allowance carried for callers that shape traffic upstream.
    pub burst_limit: u32,
    /// Count per tenant rather than globally.
    pub tenant_specific: bool,
    /// Count per user rather than globally.
    pub user_specific: bool,
    pub enabled: bool,
}

impl RateLimitRule {
    fn matches(&self, endpoint: &str) -> bool {
        self.pattern == "*" || endpoint.contains(&self.pattern)
    }
}

/// Outcome of an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Rule that governed the decision.
    pub rule_id: String,
    /// Per-minute limit of the governing rule.
    pub limit: u32,
    /// Requests left in the current minute window.
    pub remaining: u32,
    /// Seconds until the oldest counted request leaves the minute window.
    pub reset_secs: u64,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct ScopeKey {
    rule_id: String,
    tenant_id: Option<u64>,
    user_id: Option<String>,
}

#[derive(Debug, Default)]
struct ScopeWindow {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
    day: VecDeque<Instant>,
}

fn prune(window: &mut VecDeque<Instant>, size: Duration) {
    while let Some(oldest) = window.front() {
        if oldest.elapsed() > size {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Sliding-window rate limiter.
pub struct RateLimiter {
    rules: RwLock<HashMap<String, RateLimitRule>>,
    windows: Mutex<HashMap<ScopeKey, ScopeWindow>>,
    minute_window: Duration,
    hour_window: Duration,
    day_window: Duration,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rule_count", &self.rules.read().map(|r| r.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Creates a limiter with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
            minute_window: Duration::from_secs(60),
            hour_window: Duration::from_secs(3600),
            day_window: Duration::from_secs(86_400),
        }
    }

    #[cfg(test)]
    fn with_window_sizes(minute: Duration, hour: Duration, day: Duration) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
            minute_window: minute,
            hour_window: hour,
            day_window: day,
        }
    }

    /// Creates a limiter seeded with the default API rule set.
    #[must_use]
    pub fn with_default_rules() -> Self {
        let limiter = Self::new();
        limiter.add_rule(RateLimitRule {
            id: "api_default".to_string(),
            name: "Default API limit".to_string(),
            pattern: "*".to_string(),
            requests_per_minute: 100,
            requests_per_hour: 2000,
            requests_per_day: 10_000,
            burst_limit: 20,
            tenant_specific: true,
            user_specific: false,
            enabled: true,
        });
        limiter.add_rule(RateLimitRule {
            id: "llm_generate".to_string(),
            name: "LLM generation limit".to_string(),
            pattern: "/llm/generate".to_string(),
            requests_per_minute: 20,
            requests_per_hour: 300,
            requests_per_day: 2000,
            burst_limit: 5,
            tenant_specific: true,
            user_specific: false,
            enabled: true,
        });
        limiter.add_rule(RateLimitRule {
            id: "agent_create".to_string(),
            name: "Agent creation limit".to_string(),
            pattern: "/agents".to_string(),
            requests_per_minute: 10,
            requests_per_hour: 100,
            requests_per_day: 500,
            burst_limit: 2,
            tenant_specific: true,
            user_specific: false,
            enabled: true,
        });
        limiter
    }

    /// Adds or replaces a rule.
    pub fn add_rule(&self, rule: RateLimitRule) {
        debug!(rule_id = %rule.id, pattern = %rule.pattern, "adding rate limit rule");
        self.rules.write().unwrap().insert(rule.id.clone(), rule);
    }

    /// Removes a rule by id.
    ///
    /// # Returns
    /// Returns `true` if the rule existed.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        self.rules.write().unwrap().remove(rule_id).is_some()
    }

    /// Returns all configured rules.
    #[must_use]
    pub fn rules(&self) -> Vec<RateLimitRule> {
        self.rules.read().unwrap().values().cloned().collect()
    }

    /// Admission check for a request against the configured rules.
    ///
    /// # Arguments
    /// * `endpoint` - Request endpoint matched against rule patterns
    /// * `tenant_id` - Tenant scope for tenant-specific rules
    /// * `user_id` - User scope for user-specific rules
    ///
    /// # Returns
    /// `Ok(None)` when no enabled rule matches (unlimited), otherwise the
    /// decision under the governing rule.
    ///
    /// # Errors
    /// Returns [`GatewayError::RateLimited`] when a window is full.
    pub fn check(
        &self,
        endpoint: &str,
        tenant_id: Option<u64>,
        user_id: Option<&str>,
    ) -> Result<Option<RateLimitDecision>> {
        // Most restrictive matching rule wins
        let rule = {
            let rules = self.rules.read().unwrap();
            rules
                .values()
                .filter(|r| r.enabled && r.matches(endpoint))
                .min_by_key(|r| r.requests_per_minute)
                .cloned()
        };
        let Some(rule) = rule else {
            return Ok(None);
        };

        let key = ScopeKey {
            rule_id: rule.id.clone(),
            tenant_id: if rule.tenant_specific { tenant_id } else { None },
            user_id: if rule.user_specific { user_id.map(str::to_string) } else { None },
        };

        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(key).or_default();
        prune(&mut window.minute, self.minute_window);
        prune(&mut window.hour, self.hour_window);
        prune(&mut window.day, self.day_window);

        let rejection = if window.minute.len() as u32 >= rule.requests_per_minute {
            Some((rule.requests_per_minute, reset_secs(&window.minute, self.minute_window)))
        } else if window.hour.len() as u32 >= rule.requests_per_hour {
            Some((rule.requests_per_hour, reset_secs(&window.hour, self.hour_window)))
        } else if window.day.len() as u32 >= rule.requests_per_day {
            Some((rule.requests_per_day, reset_secs(&window.day, self.day_window)))
        } else {
            None
        };

        if let Some((limit, reset)) = rejection {
            warn!(
                endpoint = %endpoint,
                rule_id = %rule.id,
                limit,
                "rate limit exceeded"
            );
            // A rejected request has exhausted its window.
            return Err(GatewayError::RateLimited {
                endpoint: endpoint.to_string(),
                rule_id: rule.id,
                limit,
                remaining: 0,
                reset_secs: reset,
            });
        }

        let now = Instant::now();
        window.minute.push_back(now);
        window.hour.push_back(now);
        window.day.push_back(now);

        Ok(Some(RateLimitDecision {
            rule_id: rule.id.clone(),
            limit: rule.requests_per_minute,
            remaining: rule.requests_per_minute - window.minute.len() as u32,
            reset_secs: reset_secs(&window.minute, self.minute_window),
        }))
    }
}

fn reset_secs(window: &VecDeque<Instant>, size: Duration) -> u64 {
    window
        .front()
        .map_or(0, |oldest| size.saturating_sub(oldest.elapsed()).as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn rule(id: &str, pattern: &str, per_minute: u32) -> RateLimitRule {
        RateLimitRule {
            id: id.to_string(),
            name: id.to_string(),
            pattern: pattern.to_string(),
            requests_per_minute: per_minute,
            requests_per_hour: per_minute * 10,
            requests_per_day: per_minute * 100,
            burst_limit: 2,
            tenant_specific: false,
            user_specific: false,
            enabled: true,
        }
    }

    #[test]
    fn admits_until_minute_limit() {
        let limiter = RateLimiter::new();
        limiter.add_rule(rule("small", "*", 3));

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("/api", None, None).unwrap().unwrap();
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 3);
        }
        let err = limiter.check("/api", None, None).unwrap_err();
        match err {
            GatewayError::RateLimited { limit, remaining, reset_secs, .. } => {
                assert_eq!(limit, 3);
                assert_eq!(remaining, 0);
                assert!(reset_secs <= 60);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn no_matching_rule_is_unlimited() {
        let limiter = RateLimiter::new();
        limiter.add_rule(rule("scoped", "/llm", 1));
        assert_eq!(limiter.check("/agents", None, None).unwrap(), None);
        assert_eq!(limiter.check("/agents", None, None).unwrap(), None);
    }

    #[test]
    fn most_restrictive_rule_wins() {
        let limiter = RateLimiter::new();
        limiter.add_rule(rule("loose", "*", 100));
        limiter.add_rule(rule("tight", "/llm", 2));

        let decision = limiter.check("/llm/generate", None, None).unwrap().unwrap();
        assert_eq!(decision.rule_id, "tight");
        assert_eq!(decision.limit, 2);
    }

    #[test]
    fn disabled_rules_are_ignored() {
        let limiter = RateLimiter::new();
        let mut r = rule("off", "*", 1);
        r.enabled = false;
        limiter.add_rule(r);
        assert_eq!(limiter.check("/api", None, None).unwrap(), None);
    }

    #[test]
    fn tenant_scopes_count_independently() {
        let limiter = RateLimiter::new();
        let mut r = rule("tenant", "*", 1);
        r.tenant_specific = true;
        limiter.add_rule(r);

        assert!(limiter.check("/api", Some(1), None).unwrap().is_some());
        assert!(limiter.check("/api", Some(1), None).is_err());
        // Different tenant has its own window
        assert!(limiter.check("/api", Some(2), None).unwrap().is_some());
    }

    #[test]
    fn window_slides_and_readmits() {
        let limiter = RateLimiter::with_window_sizes(
            Duration::from_millis(80),
            Duration::from_secs(3600),
            Duration::from_secs(86_400),
        );
        limiter.add_rule(rule("tiny", "*", 1));

        assert!(limiter.check("/api", None, None).unwrap().is_some());
        assert!(limiter.check("/api", None, None).is_err());
        sleep(Duration::from_millis(100));
        assert!(limiter.check("/api", None, None).unwrap().is_some());
    }

    #[test]
    fn hour_limit_rejects_even_with_minute_headroom() {
        let limiter = RateLimiter::new();
        let mut r = rule("hourly", "*", 10);
        r.requests_per_hour = 2;
        limiter.add_rule(r);

        assert!(limiter.check("/api", None, None).unwrap().is_some());
        assert!(limiter.check("/api", None, None).unwrap().is_some());
        let err = limiter.check("/api", None, None).unwrap_err();
        match err {
            GatewayError::RateLimited { limit, .. } => assert_eq!(limit, 2),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn remove_rule_lifts_the_limit() {
        let limiter = RateLimiter::new();
        limiter.add_rule(rule("temp", "*", 1));
        assert!(limiter.check("/api", None, None).unwrap().is_some());
        assert!(limiter.check("/api", None, None).is_err());
        assert!(limiter.remove_rule("temp"));
        assert_eq!(limiter.check("/api", None, None).unwrap(), None);
    }
}
