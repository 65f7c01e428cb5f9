//! OpenAI chat-completions provider.

use crate::error::{Result, RouterError};
use crate::provider::{LlmProvider, ProviderOutput};
use async_trait::async_trait;
use lattice_models::{Capability, LlmModel, LlmRequest, Provider, TokenUsage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error};

/// Provider backed by the OpenAI chat-completions API.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiProvider {
    /// Creates a provider using the `OPENAI_API_KEY` environment variable.
    ///
    /// # Errors
    /// Returns an error if the variable is not set.
    pub fn new() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            RouterError::Config("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::with_api_key(api_key))
    }

    /// Creates a provider with an explicit API key.
    #[must_use]
    pub fn with_api_key(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            client: Client::new(),
        }
    }

    /// Overrides the API base URL, for proxies and compatible servers.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> Provider {
        Provider::OpenAi
    }

    fn models(&self) -> Vec<LlmModel> {
        vec![
            LlmModel::new("gpt-4", "GPT-4", Provider::OpenAi)
                .with_capabilities(vec![
                    Capability::TextGeneration,
                    Capability::CodeGeneration,
                    Capability::Analysis,
                    Capability::Reasoning,
                    Capability::FunctionCalling,
                ])
                .with_cost(0.03)
                .with_latency(2000.0)
                .with_limits(8192, 4096),
            LlmModel::new("gpt-3.5-turbo", "GPT-3.5 Turbo", Provider::OpenAi)
                .with_capabilities(vec![
                    Capability::TextGeneration,
                    Capability::CodeGeneration,
                    Capability::FunctionCalling,
                ])
                .with_cost(0.002)
                .with_latency(800.0)
                .with_limits(16_385, 4096),
        ]
    }

    async fn generate(&self, model_id: &str, request: &LlmRequest) -> Result<ProviderOutput> {
        debug!(
            model_id = %model_id,
            prompt_len = request.prompt.len(),
            "sending chat completion request"
        );

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage { role: "system".to_string(), content: system.clone() });
        }
        messages.push(ChatMessage { role: "user".to_string(), content: request.prompt.clone() });

        let body = ChatRequest {
            model: model_id.to_string(),
            messages,
            temperature: Some(request.temperature),
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stop: if request.stop_sequences.is_empty() {
                None
            } else {
                Some(request.stop_sequences.clone())
            },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "failed to send request to OpenAI API");
                RouterError::Provider(format!("network error: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text =
                response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            error!(status = %status, error = %error_text, "OpenAI API returned error status");
            return Err(RouterError::Provider(format!("API error ({status}): {error_text}")));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            error!(error = %e, "failed to parse OpenAI API response");
            RouterError::Provider(format!("failed to parse response: {e}"))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::Provider("no content in API response".to_string()))?;

        let usage = parsed.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderOutput {
            content: choice.message.content,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        match self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

// OpenAI API request/response structures

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
