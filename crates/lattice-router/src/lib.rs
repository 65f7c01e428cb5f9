//! Multi-provider LLM routing.
//!
//! This crate selects a model for each request from a provider-fed catalog,
//! applies a routing strategy (cost, latency, availability, or a balanced
//! blend), falls back to alternate models on provider failure, caches
//! low-temperature responses with a TTL, and tracks per-tenant usage.

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod providers;
pub mod router;

pub use cache::{CacheConfig, CacheKey, CacheStats, ResponseCache};
pub use config::RouterConfig;
pub use error::{FailureRecord, Result, RouterError};
pub use metrics::{TenantUsage, UsageLedger};
pub use provider::{LlmProvider, ProviderOutput};
pub use providers::{MockProvider, OpenAiProvider};
pub use router::ProviderRouter;
