//! Multi-tenant task orchestration: priority queue, agent runtime,
//! scheduler, executor, and health monitoring.
//!
//! The [`Orchestrator`] facade wires the pieces together with an explicit
//! `start()`/`shutdown()` lifecycle; every component is also usable on its
//! own for finer-grained embedding.

pub mod capacity;
pub mod error;
pub mod executor;
pub mod handler;
pub mod health;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod store;

use chrono::Utc;
use lattice_models::{AgentSpec, Task, TaskPriority, TaskStatus};
use lattice_router::ProviderRouter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub use capacity::{AgentCapacity, CapacityRegistry};
pub use error::{OrchestratorError, Result};
pub use executor::TaskExecutor;
pub use handler::{AgentHandler, EchoHandler, LlmHandler};
pub use health::{HealthMonitor, HealthMonitorConfig};
pub use queue::{QueueDepth, TaskQueue};
pub use runtime::{AgentRuntime, AgentStatus, RuntimeConfig, RuntimeMetrics};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::TaskStore;

/// Upper bound accepted for a task's retry budget.
const MAX_RETRY_LIMIT: u32 = 10;

/// Progress reported for a running task is capped below completion.
const RUNNING_PROGRESS_CAP: f64 = 90.0;

/// Top-level configuration for the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Resource caps for the agent runtime.
    pub runtime: RuntimeConfig,
    /// Scheduling loop settings.
    pub scheduler: SchedulerConfig,
    /// Health probe intervals.
    pub health: HealthMonitorConfig,
}

/// Point-in-time status report for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub assigned_agent_id: Option<Uuid>,
    /// Position within the task's own priority tier, when still queued.
    pub queue_position: Option<usize>,
    /// Estimated completion percentage, capped at 90 until terminal.
    pub progress: f64,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// Aggregate metrics across the queue, runtime, and running set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorMetrics {
    pub queued_critical: usize,
    pub queued_high: usize,
    pub queued_normal: usize,
    pub queued_low: usize,
    pub running_tasks: usize,
    pub finished_tasks: usize,
    /// Busy slots as a percentage of all registered slots.
    pub capacity_utilization: f64,
    pub agents: RuntimeMetrics,
}

/// Owns the orchestration components and their background loops.
#[derive(Debug)]
pub struct Orchestrator {
    queue: Arc<TaskQueue>,
    store: Arc<TaskStore>,
    capacity: Arc<CapacityRegistry>,
    runtime: Arc<AgentRuntime>,
    executor: Arc<TaskExecutor>,
    scheduler: Arc<Scheduler>,
    monitor: Arc<HealthMonitor>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl Orchestrator {
    /// Builds an orchestrator without LLM routing.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::build(config, None)
    }

    /// Builds an orchestrator whose health monitor also probes the router's
    /// providers.
    #[must_use]
    pub fn with_router(config: OrchestratorConfig, router: Arc<ProviderRouter>) -> Self {
        Self::build(config, Some(router))
    }

    fn build(config: OrchestratorConfig, router: Option<Arc<ProviderRouter>>) -> Self {
        let queue = Arc::new(TaskQueue::new());
        let store = Arc::new(TaskStore::new());
        let capacity = Arc::new(CapacityRegistry::new());
        let runtime = Arc::new(AgentRuntime::new(config.runtime, Arc::clone(&capacity)));
        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&capacity),
            Arc::clone(&runtime),
            Duration::from_secs(300),
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&capacity),
            Arc::clone(&runtime),
            Arc::clone(&executor),
            config.scheduler,
        ));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&runtime),
            Arc::clone(&capacity),
            router,
            config.health,
        ));
        Self { queue, store, capacity, runtime, executor, scheduler, monitor }
    }

    /// Starts the scheduling loop and health monitor.
    ///
    /// # Errors
    /// Returns `AlreadyRunning` if either loop is already active.
    pub fn start(&self) -> Result<()> {
        Arc::clone(&self.scheduler).start()?;
        Arc::clone(&self.monitor).start()?;
        info!("orchestrator started");
        Ok(())
    }

    /// Stops the background loops. Running tasks finish on their own.
    pub fn shutdown(&self) {
        self.monitor.stop();
        self.scheduler.stop();
        info!("orchestrator shut down");
    }

    /// Validates and enqueues a task, returning its id immediately.
    ///
    /// Critical and high priority submissions trigger an out-of-band
    /// scheduling pass ahead of the next tick.
    ///
    /// # Errors
    /// `Validation` when the task is malformed.
    pub async fn submit_task(&self, task: Task) -> Result<Uuid> {
        Self::validate_task(&task)?;

        let id = task.id;
        let urgent = task.priority >= TaskPriority::High;
        info!(
            task_id = %id,
            tenant_id = task.tenant_id,
            task_type = %task.task_type,
            priority = %task.priority,
            "task submitted"
        );
        self.queue.push(task).await;
        if urgent {
            self.scheduler.kick();
        }
        Ok(id)
    }

    /// Runs a task on a specific agent, bypassing the queue.
    ///
    /// The agent's capacity slot is still reserved through the registry, so
    /// targeted execution and scheduled execution can never double-book a
    /// slot. The call resolves once the task reaches a terminal status or is
    /// requeued for retry.
    ///
    /// # Errors
    /// `Validation` for malformed tasks or an agent that is not accepting
    /// work, `AgentNotFound` for an unknown agent, `ResourceExhausted` when
    /// the agent has no free slot.
    pub async fn execute_task(&self, agent_id: Uuid, mut task: Task) -> Result<TaskStatus> {
        Self::validate_task(&task)?;
        let status = self.runtime.agent_status(agent_id).await?;
        if !status.state.accepts_tasks() {
            return Err(OrchestratorError::Validation(format!(
                "agent {agent_id} is not accepting tasks"
            )));
        }
        let handler = self
            .runtime
            .handler(agent_id)
            .await
            .ok_or(OrchestratorError::AgentNotFound(agent_id))?;
        if !self.capacity.try_acquire(agent_id) {
            return Err(OrchestratorError::ResourceExhausted(format!(
                "agent {agent_id} has no free capacity"
            )));
        }

        task.status = TaskStatus::Assigned;
        task.assigned_agent_id = Some(agent_id);
        task.assigned_at = Some(Utc::now());
        info!(task_id = %task.id, agent_id = %agent_id, "task pinned to agent");
        let token = self.store.insert_running(task.clone()).await;
        self.runtime.note_task_started(agent_id).await;
        Ok(self.executor.execute(task, agent_id, handler, token).await)
    }

    fn validate_task(task: &Task) -> Result<()> {
        if task.agent_type.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "agent_type must not be empty".to_string(),
            ));
        }
        if task.task_type.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "task_type must not be empty".to_string(),
            ));
        }
        if task.max_retries > MAX_RETRY_LIMIT {
            return Err(OrchestratorError::Validation(format!(
                "max_retries must be at most {MAX_RETRY_LIMIT}"
            )));
        }
        if task.timeout.is_some_and(|t| t.is_zero()) {
            return Err(OrchestratorError::Validation(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if task.dependencies.contains(&task.id) {
            return Err(OrchestratorError::Validation(
                "a task cannot depend on itself".to_string(),
            ));
        }
        Ok(())
    }

    /// Reports a task's status, queue position, and progress estimate.
    ///
    /// # Errors
    /// `TaskNotFound` when the id is unknown.
    pub async fn task_status(&self, task_id: Uuid) -> Result<TaskReport> {
        let (task, queue_position) = if let Some(task) = self.queue.get(task_id).await {
            let position = self.queue.position(task_id).await;
            (task, position)
        } else {
            let task = self
                .store
                .get(task_id)
                .await
                .ok_or(OrchestratorError::TaskNotFound(task_id))?;
            (task, None)
        };

        let progress = self.estimate_progress(&task);
        Ok(TaskReport {
            task_id,
            status: task.status,
            assigned_agent_id: task.assigned_agent_id,
            queue_position,
            progress,
            retry_count: task.retry_count,
            error_message: task.error_message,
            result: task.result,
        })
    }

    /// Cancels a pending task outright or signals a running one to stop.
    ///
    /// # Errors
    /// `TaskNotFound` when the id is neither queued nor running.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<()> {
        if let Some(mut task) = self.queue.remove(task_id).await {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            info!(task_id = %task_id, "queued task cancelled");
            self.store.insert_finished(task).await;
            return Ok(());
        }
        if self.store.cancel(task_id).await {
            info!(task_id = %task_id, "running task signalled to cancel");
            return Ok(());
        }
        Err(OrchestratorError::TaskNotFound(task_id))
    }

    /// Creates and initializes an agent backed by the given handler.
    ///
    /// # Errors
    /// See [`AgentRuntime::create_agent`].
    pub async fn create_agent(
        &self,
        spec: AgentSpec,
        handler: Arc<dyn AgentHandler>,
    ) -> Result<Uuid> {
        self.runtime.create_agent(spec, handler).await
    }

    /// Starts a stopped or errored agent.
    ///
    /// # Errors
    /// `AgentNotFound` or `InvalidTransition`.
    pub async fn start_agent(&self, agent_id: Uuid) -> Result<()> {
        self.runtime.start_agent(agent_id).await
    }

    /// Stops an agent, leaving it restartable.
    ///
    /// # Errors
    /// `AgentNotFound` or `InvalidTransition`.
    pub async fn stop_agent(&self, agent_id: Uuid) -> Result<()> {
        self.runtime.stop_agent(agent_id).await
    }

    /// Stops and re-initializes an agent, bumping its restart count.
    ///
    /// # Errors
    /// `AgentNotFound`, `InvalidTransition`, or `AgentInitFailed`.
    pub async fn restart_agent(&self, agent_id: Uuid) -> Result<()> {
        self.runtime.restart_agent(agent_id).await
    }

    /// Permanently removes an agent and frees its footprint.
    ///
    /// # Errors
    /// `AgentNotFound` or `InvalidTransition`.
    pub async fn terminate_agent(&self, agent_id: Uuid) -> Result<()> {
        self.runtime.terminate_agent(agent_id).await
    }

    /// Looks up one agent's status.
    ///
    /// # Errors
    /// `AgentNotFound`.
    pub async fn agent_status(&self, agent_id: Uuid) -> Result<AgentStatus> {
        self.runtime.agent_status(agent_id).await
    }

    /// Lists live agents, optionally filtered by tenant.
    pub async fn list_agents(&self, tenant_id: Option<u64>) -> Vec<AgentStatus> {
        self.runtime.list_agents(tenant_id).await
    }

    /// Collects queue, runtime, and capacity metrics.
    pub async fn metrics(&self) -> OrchestratorMetrics {
        let depth = self.queue.depth().await;
        OrchestratorMetrics {
            queued_critical: depth.critical,
            queued_high: depth.high,
            queued_normal: depth.normal,
            queued_low: depth.low,
            running_tasks: self.store.running_count().await,
            finished_tasks: self.store.finished_count().await,
            capacity_utilization: self.capacity.utilization(),
            agents: self.runtime.metrics().await,
        }
    }

    /// The shared agent runtime.
    #[must_use]
    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    /// The shared capacity registry.
    #[must_use]
    pub fn capacity(&self) -> &Arc<CapacityRegistry> {
        &self.capacity
    }

    fn estimate_progress(&self, task: &Task) -> f64 {
        if task.status == TaskStatus::Completed {
            return 100.0;
        }
        if task.status.is_terminal() {
            return 0.0;
        }
        if task.status != TaskStatus::Running {
            return 0.0;
        }
        let Some(started_at) = task.started_at else {
            return 0.0;
        };
        let elapsed_ms = (Utc::now() - started_at).num_milliseconds().max(0) as f64;
        let average_ms = task
            .assigned_agent_id
            .and_then(|id| self.capacity.get(id))
            .map_or(0.0, |cap| cap.average_task_duration_ms);
        if average_ms <= 0.0 {
            // No history to extrapolate from yet
            return 10.0;
        }
        (elapsed_ms / average_ms * 100.0).min(RUNNING_PROGRESS_CAP)
    }
}
