//! Priority task queue.
//!
//! Four FIFO tiers, one per priority. Scheduling walks tiers in strict
//! `Critical → High → Normal → Low` order; within a tier, tasks keep
//! submission order. `remove` is the atomic claim point: when several
//! scheduling passes race over a snapshot, only the pass that wins the
//! removal assigns the task.

use lattice_models::{Task, TaskPriority};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Per-tier pending counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueDepth {
    /// Total queued tasks across every tier.
    #[must_use]
    pub fn total(&self) -> usize {
        self.critical + self.high + self.normal + self.low
    }
}

/// FIFO queue tiers keyed by priority.
pub struct TaskQueue {
    tiers: Mutex<[VecDeque<Task>; 4]>,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").finish_non_exhaustive()
    }
}

/// Tier index for a priority, highest first.
const fn tier_index(priority: TaskPriority) -> usize {
    match priority {
        TaskPriority::Critical => 0,
        TaskPriority::High => 1,
        TaskPriority::Normal => 2,
        TaskPriority::Low => 3,
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self { tiers: Mutex::new([const { VecDeque::new() }; 4]) }
    }

    /// Enqueues a task at the back of its priority tier.
    pub async fn push(&self, task: Task) {
        debug!(task_id = %task.id, priority = %task.priority, "task queued");
        let mut tiers = self.tiers.lock().await;
        tiers[tier_index(task.priority)].push_back(task);
    }

    /// Removes and returns a task by id.
    ///
    /// This is the claim point for assignment: at most one caller gets the
    /// task back.
    pub async fn remove(&self, task_id: Uuid) -> Option<Task> {
        let mut tiers = self.tiers.lock().await;
        for tier in tiers.iter_mut() {
            if let Some(pos) = tier.iter().position(|t| t.id == task_id) {
                return tier.remove(pos);
            }
        }
        None
    }

    /// Returns a copy of a queued task.
    pub async fn get(&self, task_id: Uuid) -> Option<Task> {
        let tiers = self.tiers.lock().await;
        tiers.iter().flatten().find(|t| t.id == task_id).cloned()
    }

    /// Position of a task within its own tier, zero-based.
    pub async fn position(&self, task_id: Uuid) -> Option<usize> {
        let tiers = self.tiers.lock().await;
        tiers.iter().find_map(|tier| tier.iter().position(|t| t.id == task_id))
    }

    /// Pending counts per tier.
    pub async fn depth(&self) -> QueueDepth {
        let tiers = self.tiers.lock().await;
        QueueDepth {
            critical: tiers[0].len(),
            high: tiers[1].len(),
            normal: tiers[2].len(),
            low: tiers[3].len(),
        }
    }

    /// Total queued tasks.
    pub async fn len(&self) -> usize {
        let tiers = self.tiers.lock().await;
        tiers.iter().map(VecDeque::len).sum()
    }

    /// Returns `true` when no task is queued.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copies every queued task in strict priority order.
    pub async fn snapshot(&self) -> Vec<Task> {
        let tiers = self.tiers.lock().await;
        tiers.iter().flatten().cloned().collect()
    }
}
