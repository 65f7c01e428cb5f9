//! Agent runtime: admission, lifecycle verbs, and agent selection.
//!
//! Admission is resource-based: an agent is created only while the live agent
//! count and the summed declared footprints stay under the runtime caps.
//! Lifecycle verbs drive the [`AgentState`] machine and reject invalid
//! transitions instead of guessing.

use crate::capacity::CapacityRegistry;
use crate::error::{OrchestratorError, Result};
use crate::handler::AgentHandler;
use chrono::{DateTime, Utc};
use lattice_models::{AgentSpec, AgentState, ResourceFootprint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runtime resource caps.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Maximum live (non-terminated) agents.
    pub max_agents: usize,
    pub max_cpu_cores: f64,
    pub max_memory_mb: u64,
    pub max_storage_mb: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { max_agents: 100, max_cpu_cores: 8.0, max_memory_mb: 8192, max_storage_mb: 10_240 }
    }
}

/// Point-in-time view of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: Uuid,
    pub tenant_id: u64,
    pub name: String,
    pub agent_type: String,
    pub state: AgentState,
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub current_tasks: u32,
    pub max_concurrent_tasks: u32,
    pub is_healthy: bool,
    pub last_error: Option<String>,
}

/// Aggregate runtime statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    /// Live (non-terminated) agents.
    pub total_agents: usize,
    /// Agents currently able to take tasks.
    pub available_agents: usize,
    pub agents_by_type: HashMap<String, usize>,
    pub used_cpu_cores: f64,
    pub used_memory_mb: u64,
    pub used_storage_mb: u64,
    pub max_cpu_cores: f64,
    pub max_memory_mb: u64,
    pub max_storage_mb: u64,
}

struct AgentInstance {
    spec: AgentSpec,
    state: AgentState,
    handler: Arc<dyn AgentHandler>,
    restart_count: u32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl AgentInstance {
    fn transition(&mut self, to: AgentState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        debug!(agent_id = %self.spec.id, from = %self.state, to = %to, "agent state change");
        self.state = to;
        Ok(())
    }
}

/// Owns agent instances and their handlers.
pub struct AgentRuntime {
    config: RuntimeConfig,
    agents: RwLock<HashMap<Uuid, AgentInstance>>,
    capacity: Arc<CapacityRegistry>,
}

impl fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRuntime").field("config", &self.config).finish_non_exhaustive()
    }
}

impl AgentRuntime {
    /// Creates a runtime sharing the given capacity registry.
    #[must_use]
    pub fn new(config: RuntimeConfig, capacity: Arc<CapacityRegistry>) -> Self {
        Self { config, agents: RwLock::new(HashMap::new()), capacity }
    }

    /// Creates an agent, admits it against the resource caps, and
    /// initializes its handler.
    ///
    /// # Errors
    /// `Validation` for malformed specs, `ResourceExhausted` when a cap
    /// would be exceeded, `AgentInitFailed` when the handler's
    /// initialization hook fails.
    pub async fn create_agent(
        &self,
        spec: AgentSpec,
        handler: Arc<dyn AgentHandler>,
    ) -> Result<Uuid> {
        if spec.name.trim().is_empty() {
            return Err(OrchestratorError::Validation("agent name must not be empty".to_string()));
        }
        if spec.agent_type.trim().is_empty() {
            return Err(OrchestratorError::Validation("agent type must not be empty".to_string()));
        }
        if spec.max_concurrent_tasks == 0 {
            return Err(OrchestratorError::Validation(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }

        let agent_id = spec.id;
        {
            let mut agents = self.agents.write().await;
            let live: Vec<&AgentInstance> =
                agents.values().filter(|a| a.state != AgentState::Terminated).collect();
            if live.len() >= self.config.max_agents {
                return Err(OrchestratorError::ResourceExhausted(format!(
                    "agent limit of {} reached",
                    self.config.max_agents
                )));
            }
            let used = footprint_sum(live.iter().map(|a| &a.spec.footprint));
            if used.cpu_cores + spec.footprint.cpu_cores > self.config.max_cpu_cores {
                return Err(OrchestratorError::ResourceExhausted("cpu cores".to_string()));
            }
            if used.memory_mb + spec.footprint.memory_mb > self.config.max_memory_mb {
                return Err(OrchestratorError::ResourceExhausted("memory".to_string()));
            }
            if used.storage_mb + spec.footprint.storage_mb > self.config.max_storage_mb {
                return Err(OrchestratorError::ResourceExhausted("storage".to_string()));
            }

            info!(
                agent_id = %agent_id,
                agent_type = %spec.agent_type,
                name = %spec.name,
                "creating agent"
            );
            agents.insert(
                agent_id,
                AgentInstance {
                    spec,
                    state: AgentState::Created,
                    handler,
                    restart_count: 0,
                    created_at: Utc::now(),
                    started_at: None,
                    last_error: None,
                },
            );
        }

        self.initialize_agent(agent_id).await?;
        Ok(agent_id)
    }

    /// Runs the handler's initialization hook and moves the agent to ready.
    async fn initialize_agent(&self, agent_id: Uuid) -> Result<()> {
        let (spec, handler) = {
            let mut agents = self.agents.write().await;
            let instance = agents
                .get_mut(&agent_id)
                .ok_or(OrchestratorError::AgentNotFound(agent_id))?;
            instance.transition(AgentState::Initializing)?;
            (instance.spec.clone(), Arc::clone(&instance.handler))
        };

        let init_result = handler.initialize(&spec).await;

        let mut agents = self.agents.write().await;
        let instance =
            agents.get_mut(&agent_id).ok_or(OrchestratorError::AgentNotFound(agent_id))?;
        match init_result {
            Ok(()) => {
                instance.transition(AgentState::Ready)?;
                instance.started_at = Some(Utc::now());
                instance.last_error = None;
                self.capacity.register(agent_id, instance.spec.max_concurrent_tasks);
                Ok(())
            }
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "agent initialization failed");
                instance.transition(AgentState::Error)?;
                instance.last_error = Some(e.to_string());
                Err(OrchestratorError::AgentInitFailed { agent_id, message: e.to_string() })
            }
        }
    }

    /// Starts a stopped or errored agent.
    pub async fn start_agent(&self, agent_id: Uuid) -> Result<()> {
        self.initialize_agent(agent_id).await
    }

    /// Stops a ready or running agent. In-flight tasks drain; no new tasks
    /// are assigned from this point on.
    pub async fn stop_agent(&self, agent_id: Uuid) -> Result<()> {
        let mut agents = self.agents.write().await;
        let instance =
            agents.get_mut(&agent_id).ok_or(OrchestratorError::AgentNotFound(agent_id))?;
        instance.transition(AgentState::Stopping)?;
        instance.transition(AgentState::Stopped)?;
        info!(agent_id = %agent_id, "agent stopped");
        Ok(())
    }

    /// Restarts an agent, bumping its restart counter.
    pub async fn restart_agent(&self, agent_id: Uuid) -> Result<()> {
        {
            let mut agents = self.agents.write().await;
            let instance =
                agents.get_mut(&agent_id).ok_or(OrchestratorError::AgentNotFound(agent_id))?;
            if matches!(instance.state, AgentState::Ready | AgentState::Running) {
                instance.transition(AgentState::Stopping)?;
                instance.transition(AgentState::Stopped)?;
            }
            instance.restart_count += 1;
        }
        self.initialize_agent(agent_id).await
    }

    /// Terminates an agent, freeing its declared footprint and capacity.
    pub async fn terminate_agent(&self, agent_id: Uuid) -> Result<()> {
        let mut agents = self.agents.write().await;
        let instance =
            agents.get_mut(&agent_id).ok_or(OrchestratorError::AgentNotFound(agent_id))?;
        if matches!(instance.state, AgentState::Ready | AgentState::Running) {
            instance.transition(AgentState::Stopping)?;
            instance.transition(AgentState::Stopped)?;
        }
        instance.transition(AgentState::Terminated)?;
        self.capacity.deregister(agent_id);
        info!(agent_id = %agent_id, "agent terminated");
        Ok(())
    }

    /// Selects the least-loaded healthy agent of a type with a free slot.
    pub async fn select_agent(&self, agent_type: &str) -> Option<Uuid> {
        let agents = self.agents.read().await;
        agents
            .values()
            .filter(|a| a.spec.agent_type == agent_type && a.state.accepts_tasks())
            .filter_map(|a| {
                let cap = self.capacity.get(a.spec.id)?;
                (cap.is_healthy && cap.current_tasks < cap.max_concurrent_tasks)
                    .then(|| (a.spec.id, cap.load()))
            })
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id)
    }

    /// Marks an agent as actively executing.
    pub async fn note_task_started(&self, agent_id: Uuid) {
        let mut agents = self.agents.write().await;
        if let Some(instance) = agents.get_mut(&agent_id) {
            if instance.state == AgentState::Ready {
                instance.state = AgentState::Running;
            }
        }
    }

    /// Returns an agent to ready once its last task finished.
    pub async fn note_task_finished(&self, agent_id: Uuid) {
        let idle =
            self.capacity.get(agent_id).is_none_or(|cap| cap.current_tasks == 0);
        let mut agents = self.agents.write().await;
        if let Some(instance) = agents.get_mut(&agent_id) {
            if instance.state == AgentState::Running && idle {
                instance.state = AgentState::Ready;
            }
        }
    }

    /// The handler attached to an agent.
    pub async fn handler(&self, agent_id: Uuid) -> Option<Arc<dyn AgentHandler>> {
        self.agents.read().await.get(&agent_id).map(|a| Arc::clone(&a.handler))
    }

    /// Handlers of every live agent, for health probing.
    pub async fn live_handlers(&self) -> Vec<(Uuid, Arc<dyn AgentHandler>)> {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.state != AgentState::Terminated)
            .map(|a| (a.spec.id, Arc::clone(&a.handler)))
            .collect()
    }

    /// The agent's default task timeout.
    pub async fn default_timeout(&self, agent_id: Uuid) -> Option<Duration> {
        self.agents.read().await.get(&agent_id).map(|a| a.spec.default_timeout)
    }

    /// Status for one agent.
    pub async fn agent_status(&self, agent_id: Uuid) -> Result<AgentStatus> {
        let agents = self.agents.read().await;
        let instance = agents.get(&agent_id).ok_or(OrchestratorError::AgentNotFound(agent_id))?;
        Ok(self.status_of(instance))
    }

    /// Statuses of live agents, optionally filtered by tenant.
    pub async fn list_agents(&self, tenant_id: Option<u64>) -> Vec<AgentStatus> {
        let agents = self.agents.read().await;
        agents
            .values()
            .filter(|a| a.state != AgentState::Terminated)
            .filter(|a| tenant_id.is_none_or(|t| a.spec.tenant_id == t))
            .map(|a| self.status_of(a))
            .collect()
    }

    /// Aggregate runtime statistics.
    pub async fn metrics(&self) -> RuntimeMetrics {
        let agents = self.agents.read().await;
        let live: Vec<&AgentInstance> =
            agents.values().filter(|a| a.state != AgentState::Terminated).collect();
        let used = footprint_sum(live.iter().map(|a| &a.spec.footprint));
        let mut agents_by_type: HashMap<String, usize> = HashMap::new();
        for instance in &live {
            *agents_by_type.entry(instance.spec.agent_type.clone()).or_default() += 1;
        }
        RuntimeMetrics {
            total_agents: live.len(),
            available_agents: live.iter().filter(|a| a.state.accepts_tasks()).count(),
            agents_by_type,
            used_cpu_cores: used.cpu_cores,
            used_memory_mb: used.memory_mb,
            used_storage_mb: used.storage_mb,
            max_cpu_cores: self.config.max_cpu_cores,
            max_memory_mb: self.config.max_memory_mb,
            max_storage_mb: self.config.max_storage_mb,
        }
    }

    fn status_of(&self, instance: &AgentInstance) -> AgentStatus {
        let cap = self.capacity.get(instance.spec.id);
        AgentStatus {
            id: instance.spec.id,
            tenant_id: instance.spec.tenant_id,
            name: instance.spec.name.clone(),
            agent_type: instance.spec.agent_type.clone(),
            state: instance.state,
            restart_count: instance.restart_count,
            created_at: instance.created_at,
            started_at: instance.started_at,
            current_tasks: cap.as_ref().map_or(0, |c| c.current_tasks),
            max_concurrent_tasks: instance.spec.max_concurrent_tasks,
            is_healthy: cap.as_ref().is_none_or(|c| c.is_healthy),
            last_error: instance.last_error.clone(),
        }
    }
}

fn footprint_sum<'a>(footprints: impl Iterator<Item = &'a ResourceFootprint>) -> ResourceFootprint {
    footprints.fold(
        ResourceFootprint { cpu_cores: 0.0, memory_mb: 0, storage_mb: 0 },
        |acc, f| ResourceFootprint {
            cpu_cores: acc.cpu_cores + f.cpu_cores,
            memory_mb: acc.memory_mb + f.memory_mb,
            storage_mb: acc.storage_mb + f.storage_mb,
        },
    )
}
