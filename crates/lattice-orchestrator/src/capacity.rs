//! Agent capacity registry.
//!
//! Tracks per-agent concurrency slots, health, and rolling task durations.
//! `try_acquire` is a compare-and-increment under one lock, so concurrent
//! scheduling passes can never overbook an agent. Slots are released on
//! every execution outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Capacity record for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCapacity {
    pub agent_id: Uuid,
    pub max_concurrent_tasks: u32,
    pub current_tasks: u32,
    pub is_healthy: bool,
    /// Rolling average of completed task durations in milliseconds.
    pub average_task_duration_ms: f64,
    pub completed_tasks: u64,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl AgentCapacity {
    fn new(agent_id: Uuid, max_concurrent_tasks: u32) -> Self {
        Self {
            agent_id,
            max_concurrent_tasks,
            current_tasks: 0,
            is_healthy: true,
            average_task_duration_ms: 0.0,
            completed_tasks: 0,
            last_health_check: None,
        }
    }

    /// Fraction of slots in use, 0.0 to 1.0.
    #[must_use]
    pub fn load(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 1.0;
        }
        f64::from(self.current_tasks) / f64::from(self.max_concurrent_tasks)
    }
}

/// Registry of per-agent capacity records.
pub struct CapacityRegistry {
    agents: RwLock<HashMap<Uuid, AgentCapacity>>,
}

impl fmt::Debug for CapacityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacityRegistry")
            .field("agent_count", &self.agents.read().map(|a| a.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl Default for CapacityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapacityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { agents: RwLock::new(HashMap::new()) }
    }

    /// Registers an agent with a slot limit. Replaces any existing record.
    pub fn register(&self, agent_id: Uuid, max_concurrent_tasks: u32) {
        debug!(agent_id = %agent_id, max_concurrent_tasks, "registering agent capacity");
        self.agents
            .write()
            .unwrap()
            .insert(agent_id, AgentCapacity::new(agent_id, max_concurrent_tasks));
    }

    /// Removes an agent's record.
    pub fn deregister(&self, agent_id: Uuid) {
        self.agents.write().unwrap().remove(&agent_id);
    }

    /// Atomically reserves a slot if one is free and the agent is healthy.
    ///
    /// # Returns
    /// Returns `true` when the slot was reserved.
    pub fn try_acquire(&self, agent_id: Uuid) -> bool {
        let mut agents = self.agents.write().unwrap();
        match agents.get_mut(&agent_id) {
            Some(cap) if cap.is_healthy && cap.current_tasks < cap.max_concurrent_tasks => {
                cap.current_tasks += 1;
                true
            }
            _ => false,
        }
    }

    /// Releases a previously reserved slot, flooring at zero.
    pub fn release(&self, agent_id: Uuid) {
        let mut agents = self.agents.write().unwrap();
        if let Some(cap) = agents.get_mut(&agent_id) {
            if cap.current_tasks == 0 {
                warn!(agent_id = %agent_id, "capacity release with no reserved slot");
            } else {
                cap.current_tasks -= 1;
            }
        }
    }

    /// Returns `true` when the agent is healthy with a free slot.
    #[must_use]
    pub fn has_free_slot(&self, agent_id: Uuid) -> bool {
        self.agents
            .read()
            .unwrap()
            .get(&agent_id)
            .is_some_and(|cap| cap.is_healthy && cap.current_tasks < cap.max_concurrent_tasks)
    }

    /// Writes a health probe result.
    pub fn set_healthy(&self, agent_id: Uuid, healthy: bool) {
        let mut agents = self.agents.write().unwrap();
        if let Some(cap) = agents.get_mut(&agent_id) {
            cap.is_healthy = healthy;
            cap.last_health_check = Some(Utc::now());
        }
    }

    /// Folds a completed task duration into the rolling average.
    pub fn record_duration(&self, agent_id: Uuid, duration: Duration) {
        let mut agents = self.agents.write().unwrap();
        if let Some(cap) = agents.get_mut(&agent_id) {
            cap.completed_tasks += 1;
            let observed = duration.as_millis() as f64;
            // Incremental mean: avg += (x - avg) / n
            cap.average_task_duration_ms +=
                (observed - cap.average_task_duration_ms) / cap.completed_tasks as f64;
        }
    }

    /// Returns one agent's record.
    #[must_use]
    pub fn get(&self, agent_id: Uuid) -> Option<AgentCapacity> {
        self.agents.read().unwrap().get(&agent_id).cloned()
    }

    /// Returns every record.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AgentCapacity> {
        self.agents.read().unwrap().values().cloned().collect()
    }

    /// Overall slot utilization as a percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let agents = self.agents.read().unwrap();
        let max: u32 = agents.values().map(|c| c.max_concurrent_tasks).sum();
        if max == 0 {
            return 0.0;
        }
        let current: u32 = agents.values().map(|c| c.current_tasks).sum();
        f64::from(current) / f64::from(max) * 100.0
    }
}
