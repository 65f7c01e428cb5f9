//! Per-tenant usage accounting.

use lattice_models::LlmResponse;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Aggregated usage for one tenant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TenantUsage {
    pub tenant_id: u64,
    pub total_requests: u64,
    pub total_tokens: u64,
    /// Total cost in dollars.
    pub total_cost: f64,
    /// Incrementally maintained average latency in milliseconds.
    pub average_latency_ms: f64,
}

/// Usage ledger keyed by tenant.
pub struct UsageLedger {
    usage: RwLock<HashMap<u64, TenantUsage>>,
}

impl fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageLedger")
            .field("tenant_count", &self.usage.read().map(|u| u.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self { usage: RwLock::new(HashMap::new()) }
    }

    /// Records a successful generation for a tenant.
    pub fn record(&self, tenant_id: u64, response: &LlmResponse) {
        let mut usage = self.usage.write().unwrap();
        let entry = usage.entry(tenant_id).or_insert_with(|| TenantUsage {
            tenant_id,
            ..TenantUsage::default()
        });
        entry.total_requests += 1;
        entry.total_tokens += u64::from(response.usage.total_tokens);
        entry.total_cost += response.cost;
        // Incremental mean: avg += (x - avg) / n
        entry.average_latency_ms += (response.latency_ms as f64 - entry.average_latency_ms)
            / entry.total_requests as f64;
    }

    /// Returns usage for one tenant, if any was recorded.
    #[must_use]
    pub fn tenant(&self, tenant_id: u64) -> Option<TenantUsage> {
        self.usage.read().unwrap().get(&tenant_id).cloned()
    }

    /// Returns usage for every tenant.
    #[must_use]
    pub fn all(&self) -> Vec<TenantUsage> {
        self.usage.read().unwrap().values().cloned().collect()
    }
}
