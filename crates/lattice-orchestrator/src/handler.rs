//! Agent behavior seam.

use async_trait::async_trait;
use lattice_models::{AgentSpec, Capability, LlmRequest, Task};
use lattice_router::ProviderRouter;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Behavior attached to an agent at creation time.
///
/// The runtime drives `initialize` during agent creation and restarts; the
/// executor calls `handle` for every assigned task. Errors from `handle` feed
/// the retry policy, so handlers should only fail on genuinely retryable or
/// fatal conditions and encode domain-level failures in their result value.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// One-time setup, run while the agent is in the initializing state.
    async fn initialize(&self, _spec: &AgentSpec) -> anyhow::Result<()> {
        Ok(())
    }

    /// Executes one task and returns its result payload.
    async fn handle(&self, task: &Task) -> anyhow::Result<serde_json::Value>;

    /// Liveness probe, polled by the health monitor.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Handler that echoes the task payload back. Used in tests and smoke setups.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl AgentHandler for EchoHandler {
    async fn handle(&self, task: &Task) -> anyhow::Result<serde_json::Value> {
        Ok(json!({
            "task_type": task.task_type,
            "echo": task.payload,
        }))
    }
}

/// Handler that turns task payloads into routed LLM requests.
///
/// Expects a `prompt` string in the payload; `system_prompt`, `temperature`,
/// and `max_tokens` are optional. Tasks typed `code_generation` additionally
/// require code-capable models.
#[derive(Debug, Clone)]
pub struct LlmHandler {
    router: Arc<ProviderRouter>,
}

impl LlmHandler {
    /// Creates a handler over a shared router.
    #[must_use]
    pub fn new(router: Arc<ProviderRouter>) -> Self {
        Self { router }
    }

    fn capabilities_for(task_type: &str) -> Vec<Capability> {
        match task_type {
            "code_generation" => vec![Capability::TextGeneration, Capability::CodeGeneration],
            "analysis" => vec![Capability::TextGeneration, Capability::Analysis],
            _ => vec![Capability::TextGeneration],
        }
    }
}

#[async_trait]
impl AgentHandler for LlmHandler {
    async fn handle(&self, task: &Task) -> anyhow::Result<serde_json::Value> {
        let prompt = task
            .payload
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("task payload missing 'prompt'"))?;

        let mut request = LlmRequest::new(task.tenant_id, prompt)
            .with_capabilities(Self::capabilities_for(&task.task_type));
        request.priority = task.priority;
        if let Some(system) = task.payload.get("system_prompt").and_then(|v| v.as_str()) {
            request = request.with_system_prompt(system);
        }
        if let Some(temperature) = task.payload.get("temperature").and_then(|v| v.as_f64()) {
            request = request.with_temperature(temperature as f32);
        }
        if let Some(max_tokens) = task.payload.get("max_tokens").and_then(|v| v.as_u64()) {
            request = request.with_max_tokens(max_tokens as u32);
        }

        debug!(task_id = %task.id, task_type = %task.task_type, "routing task to LLM");
        let response = self.router.generate(&request).await?;

        Ok(json!({
            "content": response.content,
            "model_used": response.model_used,
            "provider": response.provider,
            "tokens": response.usage.total_tokens,
            "cost": response.cost,
            "latency_ms": response.latency_ms,
            "cached": response.cached,
        }))
    }
}
