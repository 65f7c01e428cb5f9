//! Mock provider for tests.

use crate::error::{Result, RouterError};
use crate::provider::{LlmProvider, ProviderOutput};
use async_trait::async_trait;
use lattice_models::{Capability, LlmModel, LlmRequest, Provider, TokenUsage};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Scriptable in-memory provider.
///
/// Supports forcing the next N generation calls to fail and toggling the
/// health probe, which is enough to exercise fallback chains and the health
/// monitor.
pub struct MockProvider {
    id: Provider,
    models: Vec<LlmModel>,
    fail_remaining: AtomicU32,
    healthy: AtomicBool,
    calls: AtomicU32,
}

impl MockProvider {
    /// Creates a mock registered under the given provider id with one
    /// general-purpose model.
    #[must_use]
    pub fn new(id: Provider) -> Self {
        let model = LlmModel::new("mock-model-1", "Mock Model 1", id)
            .with_capabilities(vec![Capability::TextGeneration, Capability::CodeGeneration])
            .with_cost(0.001)
            .with_latency(50.0);
        Self {
            id,
            models: vec![model],
            fail_remaining: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            calls: AtomicU32::new(0),
        }
    }

    /// Replaces the served model list.
    #[must_use]
    pub fn with_models(mut self, models: Vec<LlmModel>) -> Self {
        self.models = models;
        self
    }

    /// Makes the next `n` generation calls fail.
    #[must_use]
    pub fn fail_times(self, n: u32) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Toggles the health probe result.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of generation calls received.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn id(&self) -> Provider {
        self.id
    }

    fn models(&self) -> Vec<LlmModel> {
        self.models.clone()
    }

    async fn generate(&self, model_id: &str, request: &LlmRequest) -> Result<ProviderOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RouterError::Provider(format!("mock failure for {model_id}")));
        }

        let content = format!("Mock response to: {}", request.prompt);
        let prompt_tokens = (request.prompt.len() / 4) as u32;
        let completion_tokens = (content.len() / 4) as u32;
        Ok(ProviderOutput {
            content,
            finish_reason: "stop".to_string(),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_prompt_and_counts_calls() {
        let provider = MockProvider::new(Provider::Custom);
        let request = LlmRequest::new(1, "hello");
        let out = provider.generate("mock-model-1", &request).await.unwrap();
        assert_eq!(out.content, "Mock response to: hello");
        assert_eq!(out.finish_reason, "stop");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let provider = MockProvider::new(Provider::Custom).fail_times(2);
        let request = LlmRequest::new(1, "hello");
        assert!(provider.generate("mock-model-1", &request).await.is_err());
        assert!(provider.generate("mock-model-1", &request).await.is_err());
        assert!(provider.generate("mock-model-1", &request).await.is_ok());
    }

    #[tokio::test]
    async fn health_toggle() {
        let provider = MockProvider::new(Provider::Custom);
        assert!(provider.health_check().await);
        provider.set_healthy(false);
        assert!(!provider.health_check().await);
    }
}
