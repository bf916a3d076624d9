//! The narrow container-engine capability the scheduler drives.
//!
//! The scheduler only ever talks to an engine through [`ContainerEngine`]; the
//! Docker/Podman implementation lives in [`crate::container`] and an in-memory
//! one in [`crate::task::mock`].

use crate::task::types::TaskDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque engine-assigned container identity
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, the way engines usually print container ids
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to create and start one container
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchSpec {
    /// Container name, unique across the run
    pub name: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Build the launch request for a task under the given container name
    pub fn for_task(
        descriptor: &TaskDescriptor,
        name: String,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name,
            image: descriptor.image.clone(),
            entrypoint: descriptor.entrypoint.clone(),
            command: descriptor.command.clone(),
            environment: descriptor.environment.clone(),
            labels,
        }
    }
}

/// Snapshot of a container as reported by the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
}

impl ContainerStatus {
    pub fn running() -> Self {
        Self {
            running: true,
            exit_code: None,
        }
    }

    pub fn exited(code: i64) -> Self {
        Self {
            running: false,
            exit_code: Some(code),
        }
    }
}

/// Failure of a single engine call
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("failed to create container: {0}")]
    Create(String),

    #[error("failed to start container: {0}")]
    Start(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("failed to inspect container: {0}")]
    Inspect(String),

    #[error("failed to fetch container output: {0}")]
    Output(String),

    #[error("failed to stop container: {0}")]
    Stop(String),

    #[error("failed to remove container: {0}")]
    Remove(String),

    #[error("engine call panicked: {0}")]
    Panicked(String),
}

/// Container lifecycle primitives used by the scheduler.
///
/// Every call may fail; the scheduler never assumes success.
#[async_trait::async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create a container from `spec` and start it
    async fn create_and_start(&self, spec: &LaunchSpec) -> Result<ContainerHandle, EngineError>;

    /// Report whether the container is still running and, if not, its exit code
    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, EngineError>;

    /// Combined stdout and stderr of the container
    async fn fetch_output(&self, handle: &ContainerHandle) -> Result<String, EngineError>;

    /// Stop the container, killing it if it does not exit in time
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// Remove the container
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// Engine name for logging
    fn engine_name(&self) -> &'static str;
}
