//! Task types and the task status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Task execution priority. Ordered so that `Critical > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Background work, scheduled last.
    Low,
    /// Default priority.
    Normal,
    /// Scheduled ahead of normal work; submission triggers an immediate
    /// scheduling pass.
    High,
    /// Preempts all other tiers in scheduling order.
    Critical,
}

impl TaskPriority {
    /// All priorities in scheduling order, highest first.
    pub const DESCENDING: [Self; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a priority name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown task priority: {0}")]
pub struct ParsePriorityError(pub String);

impl FromStr for TaskPriority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(ParsePriorityError(other.to_string())),
        }
    }
}

/// Task execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued, waiting for an agent with free capacity.
    Pending,
    /// Claimed by the scheduler for a specific agent.
    Assigned,
    /// Handler is executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Handler returned an error and retries are exhausted.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
    /// Execution exceeded the task timeout.
    Timeout,
}

impl TaskStatus {
    /// Checks if the task can transition to the given status.
    ///
    /// # Arguments
    /// * `to` - The target status
    ///
    /// # Returns
    /// Returns `true` if the transition is valid, `false` otherwise.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct transition rule
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // From Pending: assignment or cancellation
            (Self::Pending, Self::Assigned | Self::Cancelled) => true,
            // From Assigned: start, cancellation, or failure before start
            (Self::Assigned, Self::Running | Self::Cancelled | Self::Failed) => true,
            // From Running: any terminal outcome
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout) => {
                true
            }
            // Retry path: failed tasks may re-enter the queue
            (Self::Failed, Self::Pending) => true,
            // Same status is always valid
            (a, b) if *a == b => true,
            // All other transitions are invalid
            _ => false,
        }
    }

    /// Returns `true` for statuses that end the task's lifecycle.
    ///
    /// `Failed` counts as terminal here; the retry path re-enters via an
    /// explicit `Failed -> Pending` transition before the task is observed
    /// as terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// A unit of work routed to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: u64,
    /// Agent type this task must run on.
    pub agent_type: String,
    /// Application-level task kind, passed through to the handler.
    pub task_type: String,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Handler input.
    pub payload: serde_json::Value,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Agent the scheduler assigned this task to, once assigned.
    pub assigned_agent_id: Option<Uuid>,
    /// Task ids that must complete successfully before this task is eligible.
    pub dependencies: Vec<Uuid>,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// Maximum number of retries after handler failures.
    pub max_retries: u32,
    /// Per-task execution timeout; falls back to the runtime default.
    #[serde(default, with = "opt_duration_secs")]
    pub timeout: Option<Duration>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Handler output, set on completion.
    pub result: Option<serde_json::Value>,
    /// Last handler error, set on failure or retry.
    pub error_message: Option<String>,
    /// Free-form caller metadata.
    pub metadata: serde_json::Value,
}

impl Task {
    /// Creates a new pending task.
    ///
    /// # Arguments
    /// * `tenant_id` - Owning tenant
    /// * `agent_type` - Agent type the task targets
    /// * `task_type` - Application-level task kind
    /// * `payload` - Handler input
    #[must_use]
    pub fn new(
        tenant_id: u64,
        agent_type: impl Into<String>,
        task_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            agent_type: agent_type.into(),
            task_type: task_type.into(),
            priority: TaskPriority::Normal,
            payload,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            dependencies: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            timeout: None,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the tasks this task depends on.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Sets the maximum retry count.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the per-task execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets caller metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns `true` if another retry is allowed after a handler failure.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => ser.serialize_some(&d.as_secs()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<u64> = Option::deserialize(de)?;
        Ok(secs.map(Duration::from_secs))
    }
}
