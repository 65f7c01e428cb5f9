//! Shared task state: running set, finished set, cancellation tokens.

use lattice_models::{Task, TaskStatus};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// In-memory store for tasks that left the queue.
///
/// Running tasks live here together with their cancellation tokens; terminal
/// tasks move to the finished map, which also backs dependency checks.
#[derive(Default)]
pub struct TaskStore {
    running: RwLock<HashMap<Uuid, Task>>,
    finished: RwLock<HashMap<Uuid, Task>>,
    tokens: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStore").finish_non_exhaustive()
    }
}

impl TaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an assigned task and returns its cancellation token.
    pub async fn insert_running(&self, task: Task) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.write().await.insert(task.id, token.clone());
        self.running.write().await.insert(task.id, task);
        token
    }

    /// Applies an update to a running task.
    pub async fn update_running<F: FnOnce(&mut Task)>(&self, task_id: Uuid, update: F) {
        if let Some(task) = self.running.write().await.get_mut(&task_id) {
            update(task);
        }
    }

    /// Removes a task from the running set.
    pub async fn take_running(&self, task_id: Uuid) -> Option<Task> {
        self.tokens.write().await.remove(&task_id);
        self.running.write().await.remove(&task_id)
    }

    /// Records a terminal task.
    pub async fn insert_finished(&self, task: Task) {
        debug_assert!(task.status.is_terminal());
        self.finished.write().await.insert(task.id, task);
    }

    /// Looks a task up in the running set, then the finished set.
    pub async fn get(&self, task_id: Uuid) -> Option<Task> {
        if let Some(task) = self.running.read().await.get(&task_id) {
            return Some(task.clone());
        }
        self.finished.read().await.get(&task_id).cloned()
    }

    /// Returns `true` when every listed task finished with `Completed`.
    pub async fn all_completed(&self, task_ids: &[Uuid]) -> bool {
        let finished = self.finished.read().await;
        task_ids
            .iter()
            .all(|id| finished.get(id).is_some_and(|t| t.status == TaskStatus::Completed))
    }

    /// Signals cooperative cancellation of a running task.
    ///
    /// # Returns
    /// Returns `true` when a running task was signalled.
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        if let Some(token) = self.tokens.read().await.get(&task_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Number of tasks currently running.
    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Number of finished tasks.
    pub async fn finished_count(&self) -> usize {
        self.finished.read().await.len()
    }
}
