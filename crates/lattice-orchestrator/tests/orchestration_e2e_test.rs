//! End-to-end orchestration tests.
//!
//! Each test runs the real scheduler loop against in-process agents and
//! drives tasks from submission to a terminal status.

use async_trait::async_trait;
use lattice_models::{
    AgentSpec, Capability, LlmModel, Provider, Task, TaskPriority, TaskStatus,
};
use lattice_orchestrator::{
    AgentHandler, EchoHandler, LlmHandler, Orchestrator, OrchestratorConfig,
    OrchestratorError, RuntimeConfig, SchedulerConfig,
};
use lattice_router::{MockProvider, ProviderRouter};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;
use uuid::Uuid;

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        scheduler: SchedulerConfig { tick_interval: Duration::from_millis(10) },
        ..OrchestratorConfig::default()
    }
}

async fn wait_for_terminal(orchestrator: &Orchestrator, id: Uuid) -> TaskStatus {
    for _ in 0..300 {
        if let Ok(report) = orchestrator.task_status(id).await {
            if report.status.is_terminal() {
                return report.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} never reached a terminal status");
}

#[tokio::test]
async fn echo_task_completes_end_to_end() {
    let orchestrator = Orchestrator::new(fast_config());
    orchestrator
        .create_agent(AgentSpec::new(1, "echo-1", "echo"), Arc::new(EchoHandler))
        .await
        .unwrap();
    orchestrator.start().unwrap();

    let id = orchestrator
        .submit_task(Task::new(1, "echo", "echo", json!({"msg": "hello"})))
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&orchestrator, id).await, TaskStatus::Completed);

    let report = orchestrator.task_status(id).await.unwrap();
    assert!((report.progress - 100.0).abs() < f64::EPSILON);
    let result = report.result.unwrap();
    assert_eq!(result["task_type"], "echo");

    orchestrator.shutdown();
}

#[tokio::test]
async fn dependent_task_runs_after_its_dependency() {
    let orchestrator = Orchestrator::new(fast_config());
    orchestrator
        .create_agent(AgentSpec::new(1, "echo-1", "echo"), Arc::new(EchoHandler))
        .await
        .unwrap();
    orchestrator.start().unwrap();

    let first = Task::new(1, "echo", "echo", json!({"step": 1}));
    let second =
        Task::new(1, "echo", "echo", json!({"step": 2})).with_dependencies(vec![first.id]);
    let second_id = orchestrator.submit_task(second).await.unwrap();

    // The dependent task must not run while its dependency is absent.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let report = orchestrator.task_status(second_id).await.unwrap();
    assert_eq!(report.status, TaskStatus::Pending);

    let first_id = orchestrator.submit_task(first).await.unwrap();
    assert_eq!(wait_for_terminal(&orchestrator, first_id).await, TaskStatus::Completed);
    assert_eq!(wait_for_terminal(&orchestrator, second_id).await, TaskStatus::Completed);

    orchestrator.shutdown();
}

struct Recorder {
    order: Arc<tokio::sync::Mutex<Vec<Uuid>>>,
}

#[async_trait]
impl AgentHandler for Recorder {
    async fn handle(&self, task: &Task) -> anyhow::Result<serde_json::Value> {
        self.order.lock().await.push(task.id);
        Ok(serde_json::Value::Null)
    }
}

#[tokio::test]
async fn single_slot_agent_drains_tiers_in_priority_order() {
    let orchestrator = Orchestrator::new(fast_config());
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    orchestrator
        .create_agent(
            AgentSpec::new(1, "worker-1", "worker").with_max_concurrent_tasks(1),
            Arc::new(Recorder { order: Arc::clone(&order) }),
        )
        .await
        .unwrap();

    let low = Task::new(1, "worker", "echo", json!({})).with_priority(TaskPriority::Low);
    let critical =
        Task::new(1, "worker", "echo", json!({})).with_priority(TaskPriority::Critical);
    let normal = Task::new(1, "worker", "echo", json!({}));
    let expected = vec![critical.id, normal.id, low.id];

    // Everything is queued before the scheduler runs at all.
    let low_id = orchestrator.submit_task(low).await.unwrap();
    orchestrator.submit_task(critical).await.unwrap();
    orchestrator.submit_task(normal).await.unwrap();

    orchestrator.start().unwrap();
    assert_eq!(wait_for_terminal(&orchestrator, low_id).await, TaskStatus::Completed);
    orchestrator.shutdown();

    assert_eq!(*order.lock().await, expected);
}

struct FailsThenSucceeds {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl AgentHandler for FailsThenSucceeds {
    async fn handle(&self, _task: &Task) -> anyhow::Result<serde_json::Value> {
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("transient failure")
        }
        Ok(json!({"recovered": true}))
    }
}

#[tokio::test]
async fn failed_task_is_retried_until_success() {
    let orchestrator = Orchestrator::new(fast_config());
    orchestrator
        .create_agent(
            AgentSpec::new(1, "flaky-1", "flaky"),
            Arc::new(FailsThenSucceeds { remaining_failures: AtomicU32::new(2) }),
        )
        .await
        .unwrap();
    orchestrator.start().unwrap();

    let id = orchestrator
        .submit_task(Task::new(1, "flaky", "compute", json!({})))
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&orchestrator, id).await, TaskStatus::Completed);

    let report = orchestrator.task_status(id).await.unwrap();
    assert_eq!(report.retry_count, 2);

    orchestrator.shutdown();
}

#[tokio::test]
async fn exhausted_retries_fail_permanently() {
    let orchestrator = Orchestrator::new(fast_config());
    orchestrator
        .create_agent(
            AgentSpec::new(1, "flaky-1", "flaky"),
            Arc::new(FailsThenSucceeds { remaining_failures: AtomicU32::new(u32::MAX) }),
        )
        .await
        .unwrap();
    orchestrator.start().unwrap();

    let id = orchestrator
        .submit_task(Task::new(1, "flaky", "compute", json!({})).with_max_retries(1))
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&orchestrator, id).await, TaskStatus::Failed);

    let report = orchestrator.task_status(id).await.unwrap();
    assert!(report.error_message.is_some());

    orchestrator.shutdown();
}

struct Sleeper;

#[async_trait]
impl AgentHandler for Sleeper {
    async fn handle(&self, _task: &Task) -> anyhow::Result<serde_json::Value> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(serde_json::Value::Null)
    }
}

#[tokio::test]
async fn slow_task_times_out() {
    let orchestrator = Orchestrator::new(fast_config());
    orchestrator
        .create_agent(AgentSpec::new(1, "slow-1", "slow"), Arc::new(Sleeper))
        .await
        .unwrap();
    orchestrator.start().unwrap();

    let id = orchestrator
        .submit_task(
            Task::new(1, "slow", "sleep", json!({})).with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&orchestrator, id).await, TaskStatus::Timeout);

    orchestrator.shutdown();
}

#[tokio::test]
async fn running_task_can_be_cancelled() {
    let orchestrator = Orchestrator::new(fast_config());
    orchestrator
        .create_agent(AgentSpec::new(1, "slow-1", "slow"), Arc::new(Sleeper))
        .await
        .unwrap();
    orchestrator.start().unwrap();

    let id = orchestrator
        .submit_task(Task::new(1, "slow", "sleep", json!({})))
        .await
        .unwrap();

    // Wait for the task to leave the queue before cancelling.
    for _ in 0..100 {
        let report = orchestrator.task_status(id).await.unwrap();
        if report.queue_position.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    orchestrator.cancel_task(id).await.unwrap();
    assert_eq!(wait_for_terminal(&orchestrator, id).await, TaskStatus::Cancelled);

    orchestrator.shutdown();
}

struct Gated {
    barrier: Arc<Barrier>,
}

#[async_trait]
impl AgentHandler for Gated {
    async fn handle(&self, _task: &Task) -> anyhow::Result<serde_json::Value> {
        self.barrier.wait().await;
        Ok(serde_json::Value::Null)
    }
}

#[tokio::test]
async fn capacity_limits_concurrent_tasks_per_agent() {
    let orchestrator = Orchestrator::new(fast_config());
    // Two waiters must rendezvous for the handler to return, so a
    // single-slot agent would deadlock if it ever double-booked.
    let barrier = Arc::new(Barrier::new(2));
    orchestrator
        .create_agent(
            AgentSpec::new(1, "gated-1", "gated").with_max_concurrent_tasks(2),
            Arc::new(Gated { barrier: Arc::clone(&barrier) }),
        )
        .await
        .unwrap();
    orchestrator.start().unwrap();

    let first = orchestrator
        .submit_task(Task::new(1, "gated", "wait", json!({})))
        .await
        .unwrap();
    let second = orchestrator
        .submit_task(Task::new(1, "gated", "wait", json!({})))
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&orchestrator, first).await, TaskStatus::Completed);
    assert_eq!(wait_for_terminal(&orchestrator, second).await, TaskStatus::Completed);

    let capacity = orchestrator.capacity().snapshot();
    assert_eq!(capacity.len(), 1);
    assert_eq!(capacity[0].current_tasks, 0);
    assert_eq!(capacity[0].completed_tasks, 2);

    orchestrator.shutdown();
}

#[tokio::test]
async fn critical_submission_schedules_without_waiting_for_a_tick() {
    let config = OrchestratorConfig {
        // A tick interval long enough that only the kick can explain
        // completion within the test window.
        scheduler: SchedulerConfig { tick_interval: Duration::from_secs(60) },
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(config);
    orchestrator
        .create_agent(AgentSpec::new(1, "echo-1", "echo"), Arc::new(EchoHandler))
        .await
        .unwrap();
    orchestrator.start().unwrap();
    // Let the loop consume the interval's immediate first tick.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let id = orchestrator
        .submit_task(
            Task::new(1, "echo", "echo", json!({})).with_priority(TaskPriority::Critical),
        )
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&orchestrator, id).await, TaskStatus::Completed);

    orchestrator.shutdown();
}

#[tokio::test]
async fn runtime_admission_rejects_oversized_fleets() {
    let config = OrchestratorConfig {
        runtime: RuntimeConfig { max_agents: 1, ..RuntimeConfig::default() },
        ..fast_config()
    };
    let orchestrator = Orchestrator::new(config);
    orchestrator
        .create_agent(AgentSpec::new(1, "echo-1", "echo"), Arc::new(EchoHandler))
        .await
        .unwrap();

    let rejected = orchestrator
        .create_agent(AgentSpec::new(1, "echo-2", "echo"), Arc::new(EchoHandler))
        .await;
    assert!(matches!(rejected, Err(OrchestratorError::ResourceExhausted(_))));

    let metrics = orchestrator.metrics().await;
    assert_eq!(metrics.agents.total_agents, 1);
}

#[tokio::test]
async fn llm_tasks_route_through_the_provider_router() {
    let model = LlmModel::new("mock-model", "Mock Model", Provider::Custom)
        .with_capabilities(vec![Capability::TextGeneration])
        .with_cost(0.001);
    let provider = Arc::new(MockProvider::new(Provider::Custom).with_models(vec![model]));

    let router = Arc::new(ProviderRouter::new());
    router.register_provider(provider);

    let orchestrator = Orchestrator::with_router(fast_config(), Arc::clone(&router));
    orchestrator
        .create_agent(
            AgentSpec::new(7, "llm-1", "llm"),
            Arc::new(LlmHandler::new(router)),
        )
        .await
        .unwrap();
    orchestrator.start().unwrap();

    let id = orchestrator
        .submit_task(Task::new(
            7,
            "llm",
            "text_generation",
            json!({"prompt": "Summarize the quarterly report"}),
        ))
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&orchestrator, id).await, TaskStatus::Completed);

    let report = orchestrator.task_status(id).await.unwrap();
    let result = report.result.unwrap();
    assert_eq!(result["model_used"], "mock-model");
    assert!(
        result["content"]
            .as_str()
            .unwrap()
            .contains("Summarize the quarterly report")
    );

    orchestrator.shutdown();
}

#[tokio::test]
async fn targeted_execution_pins_the_task_to_the_named_agent() {
    let orchestrator = Orchestrator::new(fast_config());
    orchestrator
        .create_agent(AgentSpec::new(1, "echo-1", "echo"), Arc::new(EchoHandler))
        .await
        .unwrap();
    let target = orchestrator
        .create_agent(AgentSpec::new(1, "echo-2", "echo"), Arc::new(EchoHandler))
        .await
        .unwrap();

    // No scheduler running: targeted execution bypasses the queue entirely.
    let task = Task::new(1, "echo", "echo", json!({"msg": "direct"}));
    let id = task.id;
    let status = orchestrator.execute_task(target, task).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);

    let report = orchestrator.task_status(id).await.unwrap();
    assert_eq!(report.assigned_agent_id, Some(target));

    let missing = orchestrator
        .execute_task(Uuid::new_v4(), Task::new(1, "echo", "echo", json!({})))
        .await;
    assert!(matches!(missing, Err(OrchestratorError::AgentNotFound(_))));
}
