//! TTL cache for deterministic generation responses.
//!
//! Only low-temperature responses that finished cleanly are cacheable; the
//! key covers everything that shapes the output so two requests collide only
//! when a replayed answer is genuinely valid for both.

use lattice_models::{LlmRequest, LlmResponse};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Temperature below which responses are considered deterministic enough to
/// replay.
const CACHEABLE_TEMPERATURE: f32 = 0.3;

/// Cache tuning.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// How long an entry stays valid.
    pub ttl: Duration,
    /// How often the background sweeper evicts expired entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(3600), sweep_interval: Duration::from_secs(300) }
    }
}

/// Cache lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    prompt: String,
    system_prompt: Option<String>,
    /// Bit pattern of the temperature, so the key stays hashable.
    temperature_bits: u32,
    max_tokens: Option<u32>,
}

impl CacheKey {
    /// Builds the key for a request.
    #[must_use]
    pub fn for_request(request: &LlmRequest) -> Self {
        Self {
            prompt: request.prompt.clone(),
            system_prompt: request.system_prompt.clone(),
            temperature_bits: request.temperature.to_bits(),
            max_tokens: request.max_tokens,
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct CacheEntry {
    response: LlmResponse,
    cached_at: Instant,
}

/// TTL response cache behind a single lock.
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.read().map(|e| e.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Creates a cache with the given entry lifetime.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns `true` when a request/response pair may be cached: the
    /// sampling was near-deterministic and the model stopped on its own.
    #[must_use]
    pub fn is_cacheable(request: &LlmRequest, response: &LlmResponse) -> bool {
        request.temperature < CACHEABLE_TEMPERATURE && response.finish_reason == "stop"
    }

    /// Looks up an unexpired entry, marking the returned response as cached.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<LlmResponse> {
        let entries = self.entries.read().unwrap();
        match entries.get(key) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let mut response = entry.response.clone();
                response.cached = true;
                Some(response)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a response.
    pub fn insert(&self, key: CacheKey, response: LlmResponse) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(key, CacheEntry { response, cached_at: Instant::now() });
    }

    /// Evicts expired entries.
    ///
    /// # Returns
    /// The number of entries removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "swept expired cache entries");
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// Current counters and size.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().unwrap().len(),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default().ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lattice_models::{Provider, TokenUsage};
    use std::thread::sleep;
    use uuid::Uuid;

    fn response(content: &str, finish_reason: &str) -> LlmResponse {
        LlmResponse {
            request_id: Uuid::new_v4(),
            content: content.to_string(),
            model_used: "mock-1".to_string(),
            provider: Provider::Custom,
            usage: TokenUsage::default(),
            cost: 0.0,
            latency_ms: 5,
            finish_reason: finish_reason.to_string(),
            cached: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn get_marks_response_cached() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let request = LlmRequest::new(1, "hello");
        let key = CacheKey::for_request(&request);
        cache.insert(key.clone(), response("hi", "stop"));

        let hit = cache.get(&key).unwrap();
        assert!(hit.cached);
        assert_eq!(hit.content, "hi");
    }

    #[test]
    fn expired_entries_miss() {
        let cache = ResponseCache::new(Duration::from_millis(30));
        let request = LlmRequest::new(1, "hello");
        let key = CacheKey::for_request(&request);
        cache.insert(key.clone(), response("hi", "stop"));
        sleep(Duration::from_millis(50));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = ResponseCache::new(Duration::from_millis(30));
        let old_key = CacheKey::for_request(&LlmRequest::new(1, "old"));
        cache.insert(old_key, response("old", "stop"));
        sleep(Duration::from_millis(50));
        let fresh_key = CacheKey::for_request(&LlmRequest::new(1, "fresh"));
        cache.insert(fresh_key.clone(), response("fresh", "stop"));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.stats().entries, 1);
        assert!(cache.get(&fresh_key).is_some());
    }

    #[test]
    fn cacheability_requires_low_temperature_and_clean_finish() {
        let cold = LlmRequest::new(1, "x").with_temperature(0.1);
        let warm = LlmRequest::new(1, "x").with_temperature(0.7);
        assert!(ResponseCache::is_cacheable(&cold, &response("y", "stop")));
        assert!(!ResponseCache::is_cacheable(&warm, &response("y", "stop")));
        assert!(!ResponseCache::is_cacheable(&cold, &response("y", "length")));
    }

    #[test]
    fn key_distinguishes_sampling_parameters() {
        let a = CacheKey::for_request(&LlmRequest::new(1, "same").with_temperature(0.1));
        let b = CacheKey::for_request(&LlmRequest::new(1, "same").with_temperature(0.2));
        let c = CacheKey::for_request(&LlmRequest::new(2, "same").with_temperature(0.1));
        assert_ne!(a, b);
        // Tenant is not part of the key; identical requests share entries
        assert_eq!(a, c);
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let key = CacheKey::for_request(&LlmRequest::new(1, "hello"));
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), response("hi", "stop"));
        let _ = cache.get(&key);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
