//! Provider abstraction.

use crate::error::Result;
use async_trait::async_trait;
use lattice_models::{LlmModel, LlmRequest, Provider, TokenUsage};

/// Raw provider output before routing metadata is attached.
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub content: String,
    pub finish_reason: String,
    pub usage: TokenUsage,
}

/// A backend capable of serving generation requests.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier, used to key the client registry.
    fn id(&self) -> Provider;

    /// Catalog entries this provider serves.
    fn models(&self) -> Vec<LlmModel>;

    /// Runs a generation request against a specific model.
    ///
    /// # Arguments
    /// * `model_id` - Catalog id of the model to use
    /// * `request` - The generation request
    ///
    /// # Errors
    /// Returns [`crate::RouterError::Provider`] on API or network failure.
    async fn generate(&self, model_id: &str, request: &LlmRequest) -> Result<ProviderOutput>;

    /// Liveness probe, polled by the health monitor.
    async fn health_check(&self) -> bool;
}
