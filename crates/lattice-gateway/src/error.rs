//! Error types for the gateway admission layer.

use thiserror::Error;

/// Errors returned by admission checks.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The circuit for this endpoint is open.
    #[error("circuit open for endpoint '{endpoint}', retry in {retry_after_secs}s")]
    CircuitOpen { endpoint: String, retry_after_secs: u64 },

    /// A rate limit rule rejected the request.
    #[error("rate limit exceeded for '{endpoint}' (rule {rule_id}, limit {limit}, remaining {remaining}), resets in {reset_secs}s")]
    RateLimited { endpoint: String, rule_id: String, limit: u32, remaining: u32, reset_secs: u64 },
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
