//! Background scheduler that assigns queued tasks to agents.
//!
//! This module provides a background service that continuously walks the
//! priority queue and hands eligible tasks to the executor until shutdown.

use crate::capacity::CapacityRegistry;
use crate::error::{OrchestratorError, Result};
use crate::executor::TaskExecutor;
use crate::queue::TaskQueue;
use crate::runtime::AgentRuntime;
use crate::store::TaskStore;
use chrono::Utc;
use lattice_models::TaskStatus;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::time;
use tracing::{debug, info};

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between periodic scheduling passes.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(1) }
    }
}

/// Assigns queued tasks to agents and spawns their execution.
///
/// A pass walks the queue snapshot in strict priority order. A task is
/// eligible when every dependency has completed and a live agent of the
/// matching type has a free slot. Claiming is race-safe: the capacity
/// reservation (`try_acquire`) happens before the queue removal, and the
/// removal itself decides the winner when passes overlap.
///
/// Strict tier order means lower tiers can starve under sustained
/// higher-priority load.
pub struct Scheduler {
    queue: Arc<TaskQueue>,
    store: Arc<TaskStore>,
    capacity: Arc<CapacityRegistry>,
    runtime: Arc<AgentRuntime>,
    executor: Arc<TaskExecutor>,
    config: SchedulerConfig,
    kick: Notify,
    shutdown_tx: Mutex<Option<watch::Sender<()>>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler over the shared orchestration state.
    #[must_use]
    pub fn new(
        queue: Arc<TaskQueue>,
        store: Arc<TaskStore>,
        capacity: Arc<CapacityRegistry>,
        runtime: Arc<AgentRuntime>,
        executor: Arc<TaskExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            capacity,
            runtime,
            executor,
            config,
            kick: Notify::new(),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Starts the scheduling loop in a background task.
    ///
    /// # Errors
    /// Returns `AlreadyRunning` if the loop is already active.
    pub fn start(self: Arc<Self>) -> Result<()> {
        let mut guard = self.shutdown_tx.lock().unwrap();
        if guard.is_some() {
            return Err(OrchestratorError::AlreadyRunning);
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        *guard = Some(shutdown_tx);
        drop(guard);

        let this = self;
        tokio::spawn(async move {
            info!("scheduler started");
            let mut interval = time::interval(this.config.tick_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("scheduler shutdown signal received");
                        break;
                    }
                    () = this.kick.notified() => {
                        this.schedule_pass().await;
                    }
                    _ = interval.tick() => {
                        this.schedule_pass().await;
                    }
                }
            }
        });
        Ok(())
    }

    /// Signals the background loop to stop.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Returns `true` while the background loop is active.
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.lock().unwrap().is_some()
    }

    /// Requests an out-of-band scheduling pass.
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// Runs one scheduling pass over the current queue snapshot.
    pub async fn schedule_pass(&self) {
        for task in self.queue.snapshot().await {
            if !self.store.all_completed(&task.dependencies).await {
                continue;
            }
            let Some(agent_id) = self.runtime.select_agent(&task.agent_type).await else {
                continue;
            };
            if !self.capacity.try_acquire(agent_id) {
                continue;
            }
            // The queue removal is the claim: a concurrent pass that already
            // took this task leaves us to hand the slot back.
            let Some(mut task) = self.queue.remove(task.id).await else {
                self.capacity.release(agent_id);
                continue;
            };
            task.status = TaskStatus::Assigned;
            task.assigned_agent_id = Some(agent_id);
            task.assigned_at = Some(Utc::now());

            let Some(handler) = self.runtime.handler(agent_id).await else {
                // Agent terminated between selection and claim, requeue.
                self.capacity.release(agent_id);
                task.status = TaskStatus::Pending;
                task.assigned_agent_id = None;
                task.assigned_at = None;
                self.queue.push(task).await;
                continue;
            };

            debug!(
                task_id = %task.id,
                agent_id = %agent_id,
                priority = %task.priority,
                "task assigned"
            );
            let token = self.store.insert_running(task.clone()).await;
            self.runtime.note_task_started(agent_id).await;

            let executor = Arc::clone(&self.executor);
            tokio::spawn(async move {
                executor.execute(task, agent_id, handler, token).await;
            });
        }
    }
}
