use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::ledger::ActivityLedger;
use crate::engine::registry::{WatcherRegistry, WatcherTicket};
use crate::engine::watcher;
use crate::providers::busy::BusyOracle;
use crate::providers::container::{ContainerRuntime, ContainerState, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub inactivity_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WakeError {
    #[error("container not found: {name}")]
    NotFound { name: String },

    #[error("failed to wake {name}: {message}")]
    Runtime { name: String, message: String },
}

impl WakeError {
    fn from_runtime(name: &str, err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(_) => WakeError::NotFound {
                name: name.to_string(),
            },
            other => WakeError::Runtime {
                name: name.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WakeOutcome {
    /// `false` when the container was already running.
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchedContainer {
    pub name: String,
    pub idle_secs: Option<u64>,
}

/// Owns the activity ledger and the watcher registry, and wires them to the
/// container runtime and the busy oracle.
///
/// Each container name also gets a transition gate. `wake` (state check,
/// start, stamp, ensure watcher) and the watcher's terminal check, stop and
/// retirement run under it, so a stop can never slip in between a wake
/// seeing "running" and that wake's stamp landing.
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    oracle: Arc<dyn BusyOracle>,
    ledger: ActivityLedger,
    registry: WatcherRegistry,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    settings: WatchSettings,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        oracle: Arc<dyn BusyOracle>,
        settings: WatchSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            oracle,
            ledger: ActivityLedger::new(),
            registry: WatcherRegistry::new(),
            gates: Mutex::new(HashMap::new()),
            settings,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn settings(&self) -> WatchSettings {
        self.settings
    }

    pub fn ledger(&self) -> &ActivityLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }

    pub(crate) fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    pub(crate) fn oracle(&self) -> &dyn BusyOracle {
        self.oracle.as_ref()
    }

    pub(crate) fn gate(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates.entry(name.to_string()).or_default().clone()
    }

    /// Makes sure `name` is running, stamps its activity and makes sure a
    /// watcher supervises it.
    pub async fn wake(self: &Arc<Self>, name: &str) -> Result<WakeOutcome, WakeError> {
        // Existence check before any per-name state is created, so unknown
        // names leave no trace.
        self.runtime
            .state(name)
            .await
            .map_err(|e| WakeError::from_runtime(name, e))?;

        let gate = self.gate(name);
        let _guard = gate.lock().await;

        let state = self
            .runtime
            .state(name)
            .await
            .map_err(|e| WakeError::from_runtime(name, e))?;

        let started = match state {
            ContainerState::Running => {
                tracing::info!(container = %name, "Container already running");
                false
            }
            ContainerState::Stopped => {
                self.runtime.start(name).await.map_err(|e| {
                    tracing::error!(container = %name, error = %e, "Container start failed");
                    WakeError::from_runtime(name, e)
                })?;
                tracing::info!(container = %name, "Container started");
                true
            }
        };

        self.ledger.record_activity(name);
        self.ensure_watcher(name);

        Ok(WakeOutcome { started })
    }

    fn ensure_watcher(self: &Arc<Self>, name: &str) {
        let spawned = self.registry.ensure(name, &self.shutdown, |ticket| {
            tokio::spawn(watcher::run(Arc::clone(self), ticket));
        });
        if spawned {
            tracing::info!(container = %name, "Watcher started");
        } else {
            tracing::debug!(container = %name, "Watcher already running");
        }
    }

    /// Called by a watcher, with the gate held, when it exits for good.
    pub(crate) fn release(&self, ticket: &WatcherTicket, evict: bool) {
        self.registry.deregister(ticket);
        if evict {
            self.ledger.evict(&ticket.name);
        }
    }

    /// Asks the watcher for `name` to exit without stopping the container.
    pub fn retire(&self, name: &str) -> bool {
        self.registry.cancel(name)
    }

    /// Cancels every watcher. Containers are left as they are.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn watched(&self) -> Vec<WatchedContainer> {
        let now = Instant::now();
        self.registry
            .names()
            .into_iter()
            .map(|name| {
                let idle_secs = self.ledger.idle_for(&name, now).map(|d| d.as_secs());
                WatchedContainer { name, idle_secs }
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::providers::busy::fake::ScriptedOracle;
    use crate::providers::container::fake::FakeRuntime;

    pub(crate) fn orchestrator(
        containers: &[(&str, ContainerState)],
        busy: bool,
    ) -> (Arc<Orchestrator>, Arc<FakeRuntime>, Arc<ScriptedOracle>) {
        let runtime = Arc::new(FakeRuntime::with(containers));
        let oracle = Arc::new(ScriptedOracle::new(busy));
        let orchestrator = Orchestrator::new(runtime.clone(), oracle.clone(), WatchSettings::default());
        (orchestrator, runtime, oracle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_unknown_container_leaves_no_trace() {
        let (orchestrator, runtime, _) = orchestrator(&[("db", ContainerState::Stopped)], false);

        let err = orchestrator.wake("ghost").await.unwrap_err();
        assert!(matches!(err, WakeError::NotFound { ref name } if name == "ghost"));
        assert_eq!(orchestrator.ledger().last_activity("ghost"), None);
        assert!(orchestrator.registry().is_empty());
        assert!(orchestrator.gates.lock().unwrap().is_empty());
        assert_eq!(runtime.starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_twice_starts_once_and_advances_ledger() {
        let (orchestrator, runtime, _) = orchestrator(&[("db", ContainerState::Stopped)], false);

        let first = orchestrator.wake("db").await.unwrap();
        assert!(first.started);
        assert_eq!(runtime.starts(), 1);
        assert_eq!(runtime.current("db"), Some(ContainerState::Running));
        let stamp = orchestrator.ledger().last_activity("db").unwrap();
        assert!(orchestrator.registry().contains("db"));

        tokio::time::advance(Duration::from_secs(1)).await;
        let second = orchestrator.wake("db").await.unwrap();
        assert!(!second.started);
        assert_eq!(runtime.starts(), 1);
        assert!(orchestrator.ledger().last_activity("db").unwrap() > stamp);
        assert_eq!(orchestrator.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_running_container_still_stamps() {
        let (orchestrator, runtime, _) = orchestrator(&[("web", ContainerState::Running)], false);

        let outcome = orchestrator.wake("web").await.unwrap();
        assert!(!outcome.started);
        assert_eq!(runtime.starts(), 0);
        assert!(orchestrator.ledger().last_activity("web").is_some());
        assert!(orchestrator.registry().contains("web"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_is_runtime_error() {
        let (orchestrator, runtime, _) = orchestrator(&[("db", ContainerState::Stopped)], false);
        runtime.fail_start(true);

        let err = orchestrator.wake("db").await.unwrap_err();
        assert!(matches!(err, WakeError::Runtime { ref message, .. } if message.contains("start refused")));
        assert_eq!(orchestrator.ledger().last_activity("db"), None);
        assert!(orchestrator.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_wakes_spawn_one_watcher() {
        let (orchestrator, runtime, _) = orchestrator(&[("db", ContainerState::Stopped)], false);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.wake("db").await })
            })
            .collect();

        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().started {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert_eq!(runtime.starts(), 1);
        assert_eq!(orchestrator.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watched_reports_idle_time() {
        let (orchestrator, _, _) = orchestrator(&[("db", ContainerState::Stopped)], true);
        orchestrator.wake("db").await.unwrap();

        tokio::time::sleep(Duration::from_secs(45)).await;
        let watched = orchestrator.watched();
        assert_eq!(
            watched,
            vec![WatchedContainer {
                name: "db".into(),
                idle_secs: Some(45)
            }]
        );
    }
}
