use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, StopContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerInspectResponse, ContainerStateStatusEnum};
use bollard::Docker;

use crate::providers::container::{ContainerRuntime, ContainerState, RuntimeError};

const NOT_FOUND: u16 = 404;
const NOT_MODIFIED: u16 = 304;

/// Docker Engine adapter. The bollard client is cheap to clone and holds a
/// connection pool, so a single instance is shared by every request and watcher.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_socket_defaults()
            .map_err(|e| anyhow::anyhow!("Docker connection failed: {}", e))?;
        Ok(Self { docker })
    }

    pub async fn version(&self) -> anyhow::Result<String> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| anyhow::anyhow!("Docker version query failed: {}", e))?;
        Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
    }
}

fn map_error(name: &str, err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError { status_code, .. } if status_code == NOT_FOUND => {
            RuntimeError::NotFound(name.to_string())
        }
        other => RuntimeError::engine(name, other),
    }
}

fn is_not_modified(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError { status_code, .. } if *status_code == NOT_MODIFIED
    )
}

/// `restarting` counts as running: starting it again would only fail.
fn state_from_inspect(info: &ContainerInspectResponse) -> ContainerState {
    let Some(state) = info.state.as_ref() else {
        return ContainerState::Stopped;
    };
    let running = state.running.unwrap_or(false)
        || state.restarting.unwrap_or(false)
        || matches!(
            state.status,
            Some(ContainerStateStatusEnum::RUNNING) | Some(ContainerStateStatusEnum::RESTARTING)
        );
    if running {
        ContainerState::Running
    } else {
        ContainerState::Stopped
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn state(&self, name: &str) -> Result<ContainerState, RuntimeError> {
        let info = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(name, e))?;
        Ok(state_from_inspect(&info))
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        match self.docker.start_container::<String>(name, None).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_error(name, e)),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_error(name, e)),
        }
    }
}
