//! Docker/Podman engine backend.
//!
//! Implements [`ContainerEngine`](crate::task::ContainerEngine) on top of the
//! bollard API so the scheduler can drive real containers.
//!
//! ## Architecture
//!
//! - [`client`]: connection handling (explicit URL, local defaults, Podman sockets)
//! - [`config`]: container creation settings built from a [`LaunchSpec`](crate::task::LaunchSpec)
//! - [`orchestrator`]: image pulls and the container lifecycle calls
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ctrun::container::{ContainerClient, ContainerClientConfig, ContainerOrchestrator};
//! use ctrun::container::ContainerOrchestratorConfig;
//! use ctrun::task::{Scheduler, SchedulerConfig, TaskDescriptor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ContainerClient::with_config(ContainerClientConfig::default()).await?;
//!     let engine = ContainerOrchestrator::with_client(client, ContainerOrchestratorConfig::default());
//!
//!     let scheduler = Scheduler::new(Arc::new(engine), SchedulerConfig::default());
//!     let task = TaskDescriptor::new("hello", "alpine:latest").with_command(["echo", "hello"]);
//!     let verdicts = scheduler.run(vec![task]).await?;
//!     println!("{}", verdicts[0].reason);
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod orchestrator;

pub use client::{ContainerClient, ContainerClientConfig, RuntimeType};
pub use config::{ContainerConfig, ContainerConfigBuilder};
pub use orchestrator::{ContainerOrchestrator, ContainerOrchestratorConfig};

use crate::task::EngineError;

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Docker/Podman API error
    #[error("Container API error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    /// No runtime could be reached
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),

    /// Container not found
    #[error("Container not found: {0}")]
    NotFound(String),

    /// Container configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// General error
    #[error("Container error: {0}")]
    Other(String),
}

impl ContainerError {
    /// Map into the engine error of the call that failed.
    ///
    /// Missing containers and unreachable runtimes keep their own variants;
    /// everything else is wrapped with `call`.
    pub fn into_engine_error(self, call: fn(String) -> EngineError) -> EngineError {
        match self {
            ContainerError::NotFound(id) => EngineError::NotFound(id),
            ContainerError::Unavailable(message) => EngineError::Unavailable(message),
            ContainerError::ApiError(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            }) => EngineError::NotFound(message),
            other => call(other.to_string()),
        }
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
