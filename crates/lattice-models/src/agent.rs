//! Agent lifecycle state machine and resource accounting types.

use crate::llm::Capability;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Registered, resources reserved, handler not yet initialized.
    Created,
    /// Handler is initializing.
    Initializing,
    /// Ready to accept tasks.
    Ready,
    /// Actively executing at least one task.
    Running,
    /// Stop requested, draining.
    Stopping,
    /// Stopped; may be restarted.
    Stopped,
    /// Initialization or execution failed; may be restarted.
    Error,
    /// Removed; resources released. Terminal.
    Terminated,
}

impl AgentState {
    /// Checks if the agent can transition to the given state.
    ///
    /// # Arguments
    /// * `to` - The target state
    ///
    /// # Returns
    /// Returns `true` if the transition is valid, `false` otherwise.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct state transition rule
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // From Created: begin initialization or remove immediately
            (Self::Created, Self::Initializing | Self::Terminated) => true,
            // From Initializing: ready or failed
            (Self::Initializing, Self::Ready | Self::Error) => true,
            // From Ready: pick up work, stop, or remove
            (Self::Ready, Self::Running | Self::Stopping | Self::Terminated) => true,
            // From Running: drain back to ready, stop, or fail
            (Self::Running, Self::Ready | Self::Stopping | Self::Error) => true,
            // From Stopping: stopped or failed while draining
            (Self::Stopping, Self::Stopped | Self::Error) => true,
            // From Stopped: restart or remove
            (Self::Stopped, Self::Initializing | Self::Terminated) => true,
            // From Error: restart, stop, or remove
            (Self::Error, Self::Initializing | Self::Stopping | Self::Terminated) => true,
            // Same state is always valid
            (a, b) if *a == b => true,
            // All other transitions are invalid (Terminated is terminal)
            _ => false,
        }
    }

    /// Returns `true` if the agent can accept task assignments in this state.
    #[must_use]
    pub fn accepts_tasks(&self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Declared resource footprint of a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceFootprint {
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub storage_mb: u64,
}

impl Default for ResourceFootprint {
    fn default() -> Self {
        Self { cpu_cores: 1.0, memory_mb: 512, storage_mb: 1024 }
    }
}

/// Agent creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique agent identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: u64,
    /// Human-readable name.
    pub name: String,
    /// Agent type matched against `Task::agent_type`.
    pub agent_type: String,
    /// Capabilities this agent advertises.
    pub capabilities: Vec<Capability>,
    /// Declared resource footprint, counted against the runtime caps.
    pub footprint: ResourceFootprint,
    /// Maximum tasks this agent runs concurrently.
    pub max_concurrent_tasks: u32,
    /// Default execution timeout for tasks without one of their own.
    #[serde(default, with = "default_timeout_secs")]
    pub default_timeout: Duration,
    /// Handler-specific configuration.
    pub config: serde_json::Value,
}

impl AgentSpec {
    /// Creates a spec with default footprint, concurrency, and timeout.
    #[must_use]
    pub fn new(tenant_id: u64, name: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            agent_type: agent_type.into(),
            capabilities: Vec::new(),
            footprint: ResourceFootprint::default(),
            max_concurrent_tasks: 3,
            default_timeout: Duration::from_secs(300),
            config: serde_json::Value::Null,
        }
    }

    /// Sets the declared resource footprint.
    #[must_use]
    pub fn with_footprint(mut self, footprint: ResourceFootprint) -> Self {
        self.footprint = footprint;
        self
    }

    /// Sets the concurrent task limit.
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, max: u32) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Sets the fallback timeout for tasks that carry none of their own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets handler-specific configuration.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

mod default_timeout_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(de)?))
    }
}
