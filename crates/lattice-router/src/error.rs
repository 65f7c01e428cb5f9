//! Error types for the routing crate.

use lattice_models::Provider;
use thiserror::Error;

/// One failed generation attempt within a fallback chain.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    /// Catalog id of the model that failed.
    pub model_id: String,
    pub provider: Provider,
    /// Provider error message.
    pub error: String,
}

/// Errors returned by the router and providers.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No active model satisfies the request's capabilities, cost ceiling,
    /// and provider health requirements.
    #[error("no suitable model for the request")]
    NoSuitableModel,

    /// The primary model and every fallback attempt failed.
    #[error("all candidate models failed after {} attempts", .0.len())]
    AllProvidersFailed(Vec<FailureRecord>),

    /// A provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// An unknown routing strategy name was given.
    #[error("unknown routing strategy: {0}")]
    UnknownStrategy(String),

    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error reading a configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for routing operations.
pub type Result<T> = std::result::Result<T, RouterError>;
