//! Task execution with timeout, retry, and guaranteed slot release.

use crate::capacity::CapacityRegistry;
use crate::handler::AgentHandler;
use crate::queue::TaskQueue;
use crate::runtime::AgentRuntime;
use crate::store::TaskStore;
use chrono::Utc;
use lattice_models::{Task, TaskStatus};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

enum Outcome {
    Success(serde_json::Value),
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Drives a single assigned task to a terminal status (or back to the
/// queue for retry).
pub struct TaskExecutor {
    queue: Arc<TaskQueue>,
    store: Arc<TaskStore>,
    capacity: Arc<CapacityRegistry>,
    runtime: Arc<AgentRuntime>,
    default_timeout: Duration,
}

impl fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    /// Creates an executor over the shared orchestration state.
    #[must_use]
    pub fn new(
        queue: Arc<TaskQueue>,
        store: Arc<TaskStore>,
        capacity: Arc<CapacityRegistry>,
        runtime: Arc<AgentRuntime>,
        default_timeout: Duration,
    ) -> Self {
        Self { queue, store, capacity, runtime, default_timeout }
    }

    /// Runs an assigned task on its agent's handler.
    ///
    /// The agent's capacity slot is released exactly once, on every outcome,
    /// before retry or terminal bookkeeping. Handler failures requeue the
    /// task at its original priority while retries remain; timeouts and
    /// cancellations are terminal.
    ///
    /// # Returns
    /// The status the task ended this attempt with (`Pending` means it was
    /// requeued for retry).
    pub async fn execute(
        &self,
        mut task: Task,
        agent_id: Uuid,
        handler: Arc<dyn AgentHandler>,
        token: CancellationToken,
    ) -> TaskStatus {
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        self.store
            .update_running(task.id, |t| {
                t.status = TaskStatus::Running;
                t.started_at = task.started_at;
            })
            .await;
        info!(task_id = %task.id, agent_id = %agent_id, "task started");

        // Fallback chain: task timeout, then the agent's declared default,
        // then the runtime-wide default.
        let timeout = match task.timeout {
            Some(timeout) => timeout,
            None => self
                .runtime
                .default_timeout(agent_id)
                .await
                .unwrap_or(self.default_timeout),
        };
        let started = Instant::now();
        let outcome = tokio::select! {
            () = token.cancelled() => Outcome::Cancelled,
            result = tokio::time::timeout(timeout, handler.handle(&task)) => match result {
                Ok(Ok(value)) => Outcome::Success(value),
                Ok(Err(error)) => Outcome::Failed(error.to_string()),
                Err(_) => Outcome::TimedOut,
            },
        };
        let elapsed = started.elapsed();

        // Single release point for the capacity slot, ahead of any
        // retry or terminal bookkeeping.
        self.capacity.release(agent_id);
        self.runtime.note_task_finished(agent_id).await;
        let _ = self.store.take_running(task.id).await;

        match outcome {
            Outcome::Success(value) => {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(Utc::now());
                task.result = Some(value);
                self.capacity.record_duration(agent_id, elapsed);
                info!(
                    task_id = %task.id,
                    agent_id = %agent_id,
                    duration_ms = elapsed.as_millis() as u64,
                    "task completed"
                );
                self.store.insert_finished(task).await;
                TaskStatus::Completed
            }
            Outcome::TimedOut => {
                task.status = TaskStatus::Timeout;
                task.completed_at = Some(Utc::now());
                task.error_message =
                    Some(format!("execution exceeded timeout of {}s", timeout.as_secs()));
                warn!(task_id = %task.id, timeout_secs = timeout.as_secs(), "task timed out");
                self.store.insert_finished(task).await;
                TaskStatus::Timeout
            }
            Outcome::Cancelled => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                info!(task_id = %task.id, "task cancelled during execution");
                self.store.insert_finished(task).await;
                TaskStatus::Cancelled
            }
            Outcome::Failed(message) => {
                task.error_message = Some(message.clone());
                // The retry edge runs through Failed, never Running -> Pending
                task.status = TaskStatus::Failed;
                if task.can_retry() {
                    task.retry_count += 1;
                    task.status = TaskStatus::Pending;
                    task.assigned_agent_id = None;
                    task.assigned_at = None;
                    task.started_at = None;
                    warn!(
                        task_id = %task.id,
                        retry = task.retry_count,
                        max_retries = task.max_retries,
                        error = %message,
                        "task failed, requeueing"
                    );
                    self.queue.push(task).await;
                    TaskStatus::Pending
                } else {
                    task.completed_at = Some(Utc::now());
                    warn!(
                        task_id = %task.id,
                        retries = task.retry_count,
                        error = %message,
                        "task failed permanently"
                    );
                    self.store.insert_finished(task).await;
                    TaskStatus::Failed
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;
    use crate::runtime::RuntimeConfig;
    use async_trait::async_trait;
    use lattice_models::AgentSpec;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: AtomicU32,
    }

    #[async_trait]
    impl AgentHandler for Flaky {
        async fn handle(&self, _task: &Task) -> anyhow::Result<serde_json::Value> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
            {
                anyhow::bail!("transient failure")
            }
            Ok(json!({"ok": true}))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl AgentHandler for Sleepy {
        async fn handle(&self, _task: &Task) -> anyhow::Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(serde_json::Value::Null)
        }
    }

    struct Harness {
        queue: Arc<TaskQueue>,
        store: Arc<TaskStore>,
        capacity: Arc<CapacityRegistry>,
        executor: TaskExecutor,
        agent_id: Uuid,
    }

    async fn harness() -> Harness {
        let queue = Arc::new(TaskQueue::new());
        let store = Arc::new(TaskStore::new());
        let capacity = Arc::new(CapacityRegistry::new());
        let runtime =
            Arc::new(AgentRuntime::new(RuntimeConfig::default(), Arc::clone(&capacity)));
        let agent_id = runtime
            .create_agent(AgentSpec::new(1, "worker-1", "worker"), Arc::new(EchoHandler))
            .await
            .unwrap();
        let executor = TaskExecutor::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&capacity),
            runtime,
            Duration::from_secs(5),
        );
        Harness { queue, store, capacity, executor, agent_id }
    }

    async fn assigned_task(h: &Harness) -> (Task, CancellationToken) {
        let mut task = Task::new(1, "worker", "echo", json!({"msg": "hi"}));
        task.status = TaskStatus::Assigned;
        task.assigned_agent_id = Some(h.agent_id);
        assert!(h.capacity.try_acquire(h.agent_id));
        let token = h.store.insert_running(task.clone()).await;
        (task, token)
    }

    #[tokio::test]
    async fn success_releases_capacity_and_records_duration() {
        let h = harness().await;
        let (task, token) = assigned_task(&h).await;
        let id = task.id;

        let status =
            h.executor.execute(task, h.agent_id, Arc::new(EchoHandler), token).await;
        assert_eq!(status, TaskStatus::Completed);

        let finished = h.store.get(id).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Completed);
        assert!(finished.result.is_some());

        let cap = h.capacity.get(h.agent_id).unwrap();
        assert_eq!(cap.current_tasks, 0);
        assert_eq!(cap.completed_tasks, 1);
    }

    #[tokio::test]
    async fn handler_failure_requeues_with_retry_budget() {
        let h = harness().await;
        let (task, token) = assigned_task(&h).await;
        let id = task.id;

        let handler = Arc::new(Flaky { failures: AtomicU32::new(1) });
        let status = h.executor.execute(task, h.agent_id, handler, token).await;
        assert_eq!(status, TaskStatus::Pending);

        // Requeued at original priority with the retry counted
        let requeued = h.queue.get(id).await.unwrap();
        assert_eq!(requeued.retry_count, 1);
        assert!(requeued.assigned_agent_id.is_none());
        assert_eq!(h.capacity.get(h.agent_id).unwrap().current_tasks, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_end_in_failed() {
        let h = harness().await;
        let (mut task, _) = assigned_task(&h).await;
        task.max_retries = 0;
        let token = CancellationToken::new();
        let id = task.id;

        let handler = Arc::new(Flaky { failures: AtomicU32::new(10) });
        let status = h.executor.execute(task, h.agent_id, handler, token).await;
        assert_eq!(status, TaskStatus::Failed);

        let finished = h.store.get(id).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Failed);
        assert!(finished.error_message.is_some());
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn agent_default_timeout_applies_when_task_has_none() {
        let queue = Arc::new(TaskQueue::new());
        let store = Arc::new(TaskStore::new());
        let capacity = Arc::new(CapacityRegistry::new());
        let runtime =
            Arc::new(AgentRuntime::new(RuntimeConfig::default(), Arc::clone(&capacity)));
        let agent_id = runtime
            .create_agent(
                AgentSpec::new(1, "worker-1", "worker")
                    .with_default_timeout(Duration::from_millis(50)),
                Arc::new(EchoHandler),
            )
            .await
            .unwrap();
        let executor = TaskExecutor::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&capacity),
            runtime,
            Duration::from_secs(5),
        );

        let mut task = Task::new(1, "worker", "sleep", json!({}));
        assert!(task.timeout.is_none());
        task.status = TaskStatus::Assigned;
        task.assigned_agent_id = Some(agent_id);
        assert!(capacity.try_acquire(agent_id));
        let token = store.insert_running(task.clone()).await;
        let id = task.id;

        let status = executor.execute(task, agent_id, Arc::new(Sleepy), token).await;
        assert_eq!(status, TaskStatus::Timeout);
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Timeout);
    }

    #[tokio::test]
    async fn timeout_is_terminal_without_retry() {
        let h = harness().await;
        let (mut task, token) = assigned_task(&h).await;
        task.timeout = Some(Duration::from_millis(20));
        let id = task.id;

        let status = h.executor.execute(task, h.agent_id, Arc::new(Sleepy), token).await;
        assert_eq!(status, TaskStatus::Timeout);

        let finished = h.store.get(id).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Timeout);
        assert!(h.queue.is_empty().await);
        assert_eq!(h.capacity.get(h.agent_id).unwrap().current_tasks, 0);
    }

    #[tokio::test]
    async fn cancellation_mid_flight_releases_capacity() {
        let h = harness().await;
        let (task, token) = assigned_task(&h).await;
        let id = task.id;
        token.cancel();

        let status = h.executor.execute(task, h.agent_id, Arc::new(Sleepy), token).await;
        assert_eq!(status, TaskStatus::Cancelled);
        assert_eq!(h.store.get(id).await.unwrap().status, TaskStatus::Cancelled);
        assert_eq!(h.capacity.get(h.agent_id).unwrap().current_tasks, 0);
    }
}
