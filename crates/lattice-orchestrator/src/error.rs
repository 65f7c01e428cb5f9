//! Error types for the orchestration crate.

use thiserror::Error;
use uuid::Uuid;

/// Errors returned by orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Input failed validation before any state changed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No agent with this id is registered.
    #[error("agent not found: {0}")]
    AgentNotFound(Uuid),

    /// No task with this id is queued, running, or finished.
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Admission would exceed a runtime resource cap.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A state machine rejected the requested transition.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// An agent handler failed its initialization hook.
    #[error("agent {agent_id} failed to initialize: {message}")]
    AgentInitFailed { agent_id: Uuid, message: String },

    /// The component's background worker is already running.
    #[error("already running")]
    AlreadyRunning,
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
