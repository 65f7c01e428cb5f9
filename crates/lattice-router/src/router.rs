//! Strategy-driven model selection with fallback.

use crate::cache::{CacheConfig, CacheKey, CacheStats, ResponseCache};
use crate::config::RouterConfig;
use crate::error::{FailureRecord, Result, RouterError};
use crate::metrics::{TenantUsage, UsageLedger};
use crate::provider::LlmProvider;
use chrono::Utc;
use lattice_models::{LlmModel, LlmRequest, LlmResponse, Provider, RoutingStrategy};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Availability written for models of a provider that passes its probe.
const HEALTHY_AVAILABILITY: f64 = 99.9;
/// Availability written for models of a provider that fails its probe.
const UNHEALTHY_AVAILABILITY: f64 = 0.0;

/// Token estimate used for the cost ceiling when a request sets no limit.
const DEFAULT_ESTIMATED_TOKENS: u32 = 1000;

/// Routes generation requests across registered providers.
///
/// The catalog is seeded from each provider's [`LlmProvider::models`] at
/// registration time. Selection filters candidates by active flag, required
/// capabilities, cost ceiling, and provider health, then ranks them by the
/// configured strategy. Provider failures fall back to alternate
/// capability-matching models before the request is failed.
pub struct ProviderRouter {
    providers: RwLock<HashMap<Provider, Arc<dyn LlmProvider>>>,
    catalog: RwLock<HashMap<String, LlmModel>>,
    provider_health: RwLock<HashMap<Provider, bool>>,
    strategy: RwLock<RoutingStrategy>,
    cache: Arc<ResponseCache>,
    usage: UsageLedger,
    max_fallback_attempts: u32,
    sweeper: Mutex<Option<watch::Sender<bool>>>,
}

impl fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("model_count", &self.catalog.read().map(|c| c.len()).unwrap_or(0))
            .field("strategy", &self.strategy.read().map(|s| *s).unwrap_or_default())
            .finish_non_exhaustive()
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRouter {
    /// Creates a router with the balanced strategy and default cache tuning.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(RoutingStrategy::default(), CacheConfig::default().ttl, 2)
    }

    /// Creates a router from a validated configuration.
    ///
    /// # Errors
    /// Returns an error if the configured strategy name is unknown or a
    /// value fails validation.
    pub fn with_config(config: &RouterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_parts(
            config.parsed_strategy()?,
            config.cache_ttl(),
            config.max_fallback_attempts,
        ))
    }

    fn with_parts(strategy: RoutingStrategy, cache_ttl: Duration, max_fallback: u32) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            catalog: RwLock::new(HashMap::new()),
            provider_health: RwLock::new(HashMap::new()),
            strategy: RwLock::new(strategy),
            cache: Arc::new(ResponseCache::new(cache_ttl)),
            usage: UsageLedger::new(),
            max_fallback_attempts: max_fallback,
            sweeper: Mutex::new(None),
        }
    }

    /// Registers a provider client and merges its models into the catalog.
    ///
    /// A freshly registered provider is assumed healthy until the first
    /// probe says otherwise.
    pub fn register_provider(&self, provider: Arc<dyn LlmProvider>) {
        let id = provider.id();
        let models = provider.models();
        info!(provider = %id, model_count = models.len(), "registering provider");

        {
            let mut catalog = self.catalog.write().unwrap();
            for model in models {
                catalog.insert(model.id.clone(), model);
            }
        }
        self.provider_health.write().unwrap().insert(id, true);
        self.providers.write().unwrap().insert(id, provider);
    }

    /// Switches the routing strategy by name.
    ///
    /// # Errors
    /// Returns [`RouterError::UnknownStrategy`] for unrecognized names.
    pub fn set_strategy(&self, name: &str) -> Result<()> {
        let strategy = RoutingStrategy::from_str(name)
            .map_err(|_| RouterError::UnknownStrategy(name.to_string()))?;
        info!(strategy = %strategy, "routing strategy changed");
        *self.strategy.write().unwrap() = strategy;
        Ok(())
    }

    /// Current routing strategy.
    #[must_use]
    pub fn strategy(&self) -> RoutingStrategy {
        *self.strategy.read().unwrap()
    }

    /// Active catalog entries.
    #[must_use]
    pub fn available_models(&self) -> Vec<LlmModel> {
        self.catalog.read().unwrap().values().filter(|m| m.is_active).cloned().collect()
    }

    /// Looks up a catalog entry.
    #[must_use]
    pub fn model(&self, model_id: &str) -> Option<LlmModel> {
        self.catalog.read().unwrap().get(model_id).cloned()
    }

    /// Routes a generation request.
    ///
    /// Checks the response cache first; on a miss, tries the best-ranked
    /// candidate and then up to `max_fallback_attempts` alternates.
    ///
    /// # Errors
    /// [`RouterError::NoSuitableModel`] when no candidate passes the
    /// filters, [`RouterError::AllProvidersFailed`] when every attempt
    /// failed.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let key = CacheKey::for_request(request);
        if let Some(mut hit) = self.cache.get(&key) {
            debug!(request_id = %request.id, model = %hit.model_used, "response cache hit");
            hit.request_id = request.id;
            return Ok(hit);
        }

        let strategy = self.strategy();
        let mut candidates = self.candidates(request);
        if candidates.is_empty() {
            return Err(RouterError::NoSuitableModel);
        }
        Self::rank(&mut candidates, strategy);
        let primary = candidates.remove(0);

        // Fallbacks keep the capability and health filters but not the
        // cost ceiling.
        let tried = vec![primary.id.clone()];
        let mut fallbacks = self.fallback_candidates(request, &tried);
        Self::rank(&mut fallbacks, strategy);
        fallbacks.truncate(self.max_fallback_attempts as usize);

        let mut attempts = vec![primary];
        attempts.extend(fallbacks);

        let mut failures: Vec<FailureRecord> = Vec::new();
        for model in attempts {
            let client = self.providers.read().unwrap().get(&model.provider).cloned();
            let Some(client) = client else {
                failures.push(FailureRecord {
                    model_id: model.id.clone(),
                    provider: model.provider,
                    error: "provider not registered".to_string(),
                });
                continue;
            };

            let started = Instant::now();
            match client.generate(&model.id, request).await {
                Ok(output) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    let cost = f64::from(output.usage.total_tokens) / 1000.0
                        * model.cost_per_1k_tokens;
                    let response = LlmResponse {
                        request_id: request.id,
                        content: output.content,
                        model_used: model.id.clone(),
                        provider: model.provider,
                        usage: output.usage,
                        cost,
                        latency_ms,
                        finish_reason: output.finish_reason,
                        cached: false,
                        created_at: Utc::now(),
                    };

                    self.observe_latency(&model.id, latency_ms);
                    if ResponseCache::is_cacheable(request, &response) {
                        self.cache.insert(key, response.clone());
                    }
                    self.usage.record(request.tenant_id, &response);

                    if failures.is_empty() {
                        debug!(
                            request_id = %request.id,
                            model = %model.id,
                            latency_ms,
                            "request served"
                        );
                    } else {
                        info!(
                            request_id = %request.id,
                            model = %model.id,
                            failed_attempts = failures.len(),
                            "request served after fallback"
                        );
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(model = %model.id, error = %e, "model attempt failed");
                    failures.push(FailureRecord {
                        model_id: model.id.clone(),
                        provider: model.provider,
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(RouterError::AllProvidersFailed(failures))
    }

    /// Probes every registered provider and writes the results into the
    /// health map and model availability.
    pub async fn probe_providers(&self) -> HashMap<Provider, bool> {
        let clients: Vec<(Provider, Arc<dyn LlmProvider>)> = self
            .providers
            .read()
            .unwrap()
            .iter()
            .map(|(id, client)| (*id, Arc::clone(client)))
            .collect();

        let mut results = HashMap::new();
        for (id, client) in clients {
            results.insert(id, client.health_check().await);
        }

        let mut health = self.provider_health.write().unwrap();
        let mut catalog = self.catalog.write().unwrap();
        for (id, healthy) in &results {
            health.insert(*id, *healthy);
            let availability =
                if *healthy { HEALTHY_AVAILABILITY } else { UNHEALTHY_AVAILABILITY };
            for model in catalog.values_mut().filter(|m| m.provider == *id) {
                model.availability = availability;
            }
            if !healthy {
                warn!(provider = %id, "provider failed health probe");
            }
        }
        results
    }

    /// Usage recorded for one tenant.
    #[must_use]
    pub fn tenant_usage(&self, tenant_id: u64) -> Option<TenantUsage> {
        self.usage.tenant(tenant_id)
    }

    /// Usage recorded for every tenant.
    #[must_use]
    pub fn all_usage(&self) -> Vec<TenantUsage> {
        self.usage.all()
    }

    /// Response cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Starts the background cache sweeper.
    ///
    /// Replaces any sweeper already running.
    pub fn start_cache_sweeper(&self, interval: Duration) {
        let (tx, mut rx) = watch::channel(false);
        if let Some(old) = self.sweeper.lock().unwrap().replace(tx) {
            let _ = old.send(true);
        }
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        cache.sweep();
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            debug!("cache sweeper stopping");
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Stops the background cache sweeper if one is running.
    pub fn stop_cache_sweeper(&self) {
        if let Some(tx) = self.sweeper.lock().unwrap().take() {
            let _ = tx.send(true);
        }
    }

    fn candidates(&self, request: &LlmRequest) -> Vec<LlmModel> {
        let providers = self.providers.read().unwrap();
        let health = self.provider_health.read().unwrap();
        let catalog = self.catalog.read().unwrap();
        catalog
            .values()
            .filter(|m| m.is_active)
            .filter(|m| m.supports(&request.required_capabilities))
            .filter(|m| providers.contains_key(&m.provider))
            .filter(|m| health.get(&m.provider).copied().unwrap_or(false))
            .filter(|m| {
                request
                    .cost_limit
                    .is_none_or(|limit| Self::estimated_cost(request, m) <= limit)
            })
            .cloned()
            .collect()
    }

    fn fallback_candidates(&self, request: &LlmRequest, tried: &[String]) -> Vec<LlmModel> {
        let providers = self.providers.read().unwrap();
        let health = self.provider_health.read().unwrap();
        let catalog = self.catalog.read().unwrap();
        catalog
            .values()
            .filter(|m| m.is_active)
            .filter(|m| !tried.contains(&m.id))
            .filter(|m| m.supports(&request.required_capabilities))
            .filter(|m| providers.contains_key(&m.provider))
            .filter(|m| health.get(&m.provider).copied().unwrap_or(false))
            .cloned()
            .collect()
    }

    fn estimated_cost(request: &LlmRequest, model: &LlmModel) -> f64 {
        f64::from(request.max_tokens.unwrap_or(DEFAULT_ESTIMATED_TOKENS)) / 1000.0
            * model.cost_per_1k_tokens
    }

    fn balanced_score(model: &LlmModel) -> f64 {
        (1.0 / (model.cost_per_1k_tokens + 0.001)) * 0.3
            + (1.0 / (model.avg_latency_ms + 100.0)) * 0.4
            + (model.availability / 100.0) * 0.3
    }

    fn rank(models: &mut [LlmModel], strategy: RoutingStrategy) {
        let cmp = |a: f64, b: f64| a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        match strategy {
            RoutingStrategy::CostOptimized => {
                models.sort_by(|a, b| cmp(a.cost_per_1k_tokens, b.cost_per_1k_tokens));
            }
            RoutingStrategy::PerformanceOptimized => {
                models.sort_by(|a, b| cmp(a.avg_latency_ms, b.avg_latency_ms));
            }
            RoutingStrategy::AvailabilityOptimized => {
                models.sort_by(|a, b| cmp(b.availability, a.availability));
            }
            RoutingStrategy::Balanced => {
                models.sort_by(|a, b| cmp(Self::balanced_score(b), Self::balanced_score(a)));
            }
        }
    }

    /// Folds an observed latency into the model's rolling average (EWMA).
    fn observe_latency(&self, model_id: &str, latency_ms: u64) {
        let mut catalog = self.catalog.write().unwrap();
        if let Some(model) = catalog.get_mut(model_id) {
            let observed = latency_ms as f64;
            model.avg_latency_ms = if model.avg_latency_ms == 0.0 {
                observed
            } else {
                model.avg_latency_ms * 0.9 + observed * 0.1
            };
        }
    }
}
