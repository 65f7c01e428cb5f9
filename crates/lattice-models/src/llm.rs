//! LLM model catalog, request/response, and routing strategy types.

use crate::task::TaskPriority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Model or agent capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextGeneration,
    CodeGeneration,
    Analysis,
    Reasoning,
    Multimodal,
    FunctionCalling,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TextGeneration => "text_generation",
            Self::CodeGeneration => "code_generation",
            Self::Analysis => "analysis",
            Self::Reasoning => "reasoning",
            Self::Multimodal => "multimodal",
            Self::FunctionCalling => "function_calling",
        };
        write!(f, "{s}")
    }
}

/// LLM provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    Azure,
    Custom,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Azure => "azure",
            Self::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

/// Catalog entry for a routable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmModel {
    /// Catalog key, e.g. `gpt-4`.
    pub id: String,
    /// Display name.
    pub name: String,
    pub provider: Provider,
    pub capabilities: Vec<Capability>,
    /// Cost in dollars per 1000 tokens.
    pub cost_per_1k_tokens: f64,
    /// Rolling average latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Availability percentage, 0.0 to 100.0.
    pub availability: f64,
    pub context_window: u32,
    pub max_tokens: u32,
    pub is_active: bool,
}

impl LlmModel {
    /// Creates an active model entry with full availability.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, provider: Provider) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider,
            capabilities: Vec::new(),
            cost_per_1k_tokens: 0.0,
            avg_latency_ms: 0.0,
            availability: 100.0,
            context_window: 8192,
            max_tokens: 4096,
            is_active: true,
        }
    }

    /// Sets the advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the cost per 1000 tokens.
    #[must_use]
    pub fn with_cost(mut self, cost_per_1k_tokens: f64) -> Self {
        self.cost_per_1k_tokens = cost_per_1k_tokens;
        self
    }

    /// Sets the average latency in milliseconds.
    #[must_use]
    pub fn with_latency(mut self, avg_latency_ms: f64) -> Self {
        self.avg_latency_ms = avg_latency_ms;
        self
    }

    /// Sets context window and output token limits.
    #[must_use]
    pub fn with_limits(mut self, context_window: u32, max_tokens: u32) -> Self {
        self.context_window = context_window;
        self.max_tokens = max_tokens;
        self
    }

    /// Returns `true` if this model advertises every required capability.
    #[must_use]
    pub fn supports(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }
}

/// A generation request routed through the provider router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub id: Uuid,
    pub tenant_id: u64,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Vec<String>,
    pub priority: TaskPriority,
    /// Capabilities a candidate model must advertise.
    pub required_capabilities: Vec<Capability>,
    /// Maximum estimated cost in dollars, if any.
    pub cost_limit: Option<f64>,
}

impl LlmRequest {
    /// Creates a request with default sampling parameters.
    #[must_use]
    pub fn new(tenant_id: u64, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: None,
            top_p: None,
            stop_sequences: Vec::new(),
            priority: TaskPriority::Normal,
            required_capabilities: Vec::new(),
            cost_limit: None,
        }
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the output token ceiling.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the required model capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    /// Sets the cost ceiling in dollars.
    #[must_use]
    pub fn with_cost_limit(mut self, cost_limit: f64) -> Self {
        self.cost_limit = Some(cost_limit);
        self
    }
}

/// Token counts reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub request_id: Uuid,
    pub content: String,
    /// Catalog id of the model that produced the content.
    pub model_used: String,
    pub provider: Provider,
    pub usage: TokenUsage,
    /// Actual cost in dollars based on reported usage.
    pub cost: f64,
    pub latency_ms: u64,
    pub finish_reason: String,
    /// `true` when served from the response cache.
    pub cached: bool,
    pub created_at: DateTime<Utc>,
}

/// Model selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Weighted blend of cost, latency, and availability.
    Balanced,
    /// Cheapest eligible model.
    CostOptimized,
    /// Lowest-latency eligible model.
    PerformanceOptimized,
    /// Highest-availability eligible model.
    AvailabilityOptimized,
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        Self::Balanced
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Balanced => "balanced",
            Self::CostOptimized => "cost_optimized",
            Self::PerformanceOptimized => "performance_optimized",
            Self::AvailabilityOptimized => "availability_optimized",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a strategy name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown routing strategy: {0}")]
pub struct ParseStrategyError(pub String);

impl FromStr for RoutingStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(Self::Balanced),
            "cost" | "cost_optimized" => Ok(Self::CostOptimized),
            "performance" | "performance_optimized" => Ok(Self::PerformanceOptimized),
            "availability" | "availability_optimized" => Ok(Self::AvailabilityOptimized),
            other => Err(ParseStrategyError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_capability_superset() {
        let model = LlmModel::new("gpt-4", "GPT-4", Provider::OpenAi).with_capabilities(vec![
            Capability::TextGeneration,
            Capability::CodeGeneration,
            Capability::Reasoning,
        ]);
        assert!(model.supports(&[Capability::TextGeneration]));
        assert!(model.supports(&[Capability::CodeGeneration, Capability::Reasoning]));
        assert!(!model.supports(&[Capability::Multimodal]));
        assert!(model.supports(&[]));
    }

    #[test]
    fn strategy_parses_and_rejects() {
        assert_eq!("balanced".parse::<RoutingStrategy>(), Ok(RoutingStrategy::Balanced));
        assert_eq!(
            "cost_optimized".parse::<RoutingStrategy>(),
            Ok(RoutingStrategy::CostOptimized)
        );
        assert_eq!("cost".parse::<RoutingStrategy>(), Ok(RoutingStrategy::CostOptimized));
        let err = "cheapest".parse::<RoutingStrategy>().unwrap_err();
        assert_eq!(err.to_string(), "unknown routing strategy: cheapest");
    }

    #[test]
    fn request_builder() {
        let req = LlmRequest::new(42, "hello")
            .with_temperature(0.1)
            .with_max_tokens(256)
            .with_capabilities(vec![Capability::TextGeneration])
            .with_cost_limit(0.5);
        assert_eq!(req.tenant_id, 42);
        assert_eq!(req.temperature, 0.1);
        assert_eq!(req.max_tokens, Some(256));
        assert_eq!(req.cost_limit, Some(0.5));
    }

    #[test]
    fn strategy_display_round_trips() {
        for strategy in [
            RoutingStrategy::Balanced,
            RoutingStrategy::CostOptimized,
            RoutingStrategy::PerformanceOptimized,
            RoutingStrategy::AvailabilityOptimized,
        ] {
            assert_eq!(strategy.to_string().parse::<RoutingStrategy>(), Ok(strategy));
        }
    }
}
