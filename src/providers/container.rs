use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Observed state of a container, as far as the orchestrator cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Stopped,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Running => f.write_str("running"),
            ContainerState::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container engine error for {name}: {message}")]
    Engine { name: String, message: String },
}

impl RuntimeError {
    pub fn engine(name: &str, message: impl fmt::Display) -> Self {
        RuntimeError::Engine {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Start/stop/status capability over whatever actually runs the containers.
///
/// The orchestrator never invents state: it reads it through `state` and asks
/// for transitions through `start` and `stop`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn state(&self, name: &str) -> Result<ContainerState, RuntimeError>;
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;
    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory runtime that counts the transitions it is asked for.
    #[derive(Default)]
    pub struct FakeRuntime {
        containers: Mutex<HashMap<String, ContainerState>>,
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: Mutex<bool>,
        fail_stop: Mutex<bool>,
    }

    impl FakeRuntime {
        pub fn with(names: &[(&str, ContainerState)]) -> Self {
            let runtime = Self::default();
            {
                let mut containers = runtime.containers.lock().unwrap();
                for (name, state) in names {
                    containers.insert(name.to_string(), *state);
                }
            }
            runtime
        }

        pub fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        pub fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }

        pub fn set_state(&self, name: &str, state: ContainerState) {
            self.containers.lock().unwrap().insert(name.to_string(), state);
        }

        pub fn remove(&self, name: &str) {
            self.containers.lock().unwrap().remove(name);
        }

        pub fn current(&self, name: &str) -> Option<ContainerState> {
            self.containers.lock().unwrap().get(name).copied()
        }

        pub fn fail_start(&self, fail: bool) {
            *self.fail_start.lock().unwrap() = fail;
        }

        pub fn fail_stop(&self, fail: bool) {
            *self.fail_stop.lock().unwrap() = fail;
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn state(&self, name: &str) -> Result<ContainerState, RuntimeError> {
            self.current(name)
                .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
        }

        async fn start(&self, name: &str) -> Result<(), RuntimeError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if *self.fail_start.lock().unwrap() {
                return Err(RuntimeError::engine(name, "start refused"));
            }
            let mut containers = self.containers.lock().unwrap();
            match containers.get_mut(name) {
                Some(state) => {
                    *state = ContainerState::Running;
                    Ok(())
                }
                None => Err(RuntimeError::NotFound(name.to_string())),
            }
        }

        async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if *self.fail_stop.lock().unwrap() {
                return Err(RuntimeError::engine(name, "stop refused"));
            }
            let mut containers = self.containers.lock().unwrap();
            match containers.get_mut(name) {
                Some(state) => {
                    *state = ContainerState::Stopped;
                    Ok(())
                }
                None => Err(RuntimeError::NotFound(name.to_string())),
            }
        }
    }
}
