//! Background health monitoring for agents and model providers.

use crate::capacity::CapacityRegistry;
use crate::error::{OrchestratorError, Result};
use crate::runtime::AgentRuntime;
use futures::future;
use lattice_router::ProviderRouter;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

/// Configuration for the health monitor.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Interval between agent handler probes.
    pub agent_interval: Duration,
    /// Interval between provider probes.
    pub provider_interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            agent_interval: Duration::from_secs(30),
            provider_interval: Duration::from_secs(300),
        }
    }
}

/// Probes agent handlers and model providers on fixed intervals.
///
/// The monitor only writes health flags; the scheduler and router read them
/// on their own next cycle.
pub struct HealthMonitor {
    runtime: Arc<AgentRuntime>,
    capacity: Arc<CapacityRegistry>,
    router: Option<Arc<ProviderRouter>>,
    config: HealthMonitorConfig,
    shutdown_tx: Mutex<Option<watch::Sender<()>>>,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor").field("config", &self.config).finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Creates a monitor over the runtime and, optionally, the router.
    #[must_use]
    pub fn new(
        runtime: Arc<AgentRuntime>,
        capacity: Arc<CapacityRegistry>,
        router: Option<Arc<ProviderRouter>>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self { runtime, capacity, router, config, shutdown_tx: Mutex::new(None) }
    }

    /// Starts the probe loop in a background task.
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
            info!("health monitor started");
            let mut agent_tick = time::interval(this.config.agent_interval);
            let mut provider_tick = time::interval(this.config.provider_interval);
            agent_tick.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            provider_tick.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("health monitor shutdown signal received");
                        break;
                    }
                    _ = agent_tick.tick() => {
                        this.probe_agents().await;
                    }
                    _ = provider_tick.tick() => {
                        this.probe_providers().await;
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

    /// Probes every live agent handler and records the result.
    pub async fn probe_agents(&self) {
        let handlers = self.runtime.live_handlers().await;
        let probes = handlers.into_iter().map(|(agent_id, handler)| async move {
            (agent_id, handler.health_check().await)
        });
        for (agent_id, healthy) in future::join_all(probes).await {
            if !healthy {
                warn!(agent_id = %agent_id, "agent failed health check");
            }
            self.capacity.set_healthy(agent_id, healthy);
        }
    }

    /// Probes every registered provider and updates model availability.
    pub async fn probe_providers(&self) {
        if let Some(router) = &self.router {
            let results = router.probe_providers().await;
            debug!(providers = results.len(), "provider health pass complete");
        }
    }
}
