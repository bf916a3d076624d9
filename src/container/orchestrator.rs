//! Container lifecycle orchestration.
//!
//! Provides image pulls and the create, start, inspect, logs, stop and remove
//! calls, and exposes them to the scheduler as a [`ContainerEngine`].

use crate::container::{ContainerClient, ContainerConfig, ContainerError, Result};
use crate::env;
use crate::task::{ContainerEngine, ContainerHandle, ContainerStatus, EngineError, LaunchSpec};
use futures::stream::StreamExt;
use tracing::{debug, info, warn};

/// Container orchestrator configuration.
#[derive(Debug, Clone)]
pub struct ContainerOrchestratorConfig {
    /// Automatically pull images if not present
    pub auto_pull: bool,
    /// Seconds the engine waits after SIGTERM before killing a container
    pub stop_timeout: i64,
}

impl Default for ContainerOrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_pull: true,
            stop_timeout: env::defaults::STOP_GRACE_SECS as i64,
        }
    }
}

/// High-level container orchestrator.
pub struct ContainerOrchestrator {
    client: ContainerClient,
    config: ContainerOrchestratorConfig,
}

impl ContainerOrchestrator {
    /// Create an orchestrator with an existing client.
    pub fn with_client(client: ContainerClient, config: ContainerOrchestratorConfig) -> Self {
        Self { client, config }
    }

    /// Pull a container image if not present locally.
    ///
    /// # Errors
    ///
    /// Returns error if image pull fails.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.client.image_exists(image).await? {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }

        info!("Pulling image: {}", image);
        self.pull_image(image).await
    }

    /// Pull a container image from registry.
    ///
    /// # Errors
    ///
    /// Returns error if image pull fails.
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        let mut stream = self.client.docker().create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(ContainerError::ApiError(e));
                }
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    /// Create a named container and return its ID.
    ///
    /// # Errors
    ///
    /// Returns error if the image cannot be pulled or creation fails.
    pub async fn create_container(&self, config: &ContainerConfig, name: &str) -> Result<String> {
        if self.config.auto_pull {
            self.ensure_image(&config.image).await?;
        }

        let options = bollard::container::CreateContainerOptions {
            name,
            ..Default::default()
        };

        debug!("Creating container: {}", name);

        let response = self
            .client
            .docker()
            .create_container(Some(options), config.to_bollard())
            .await?;

        for warning in &response.warnings {
            warn!("Engine warning for {}: {}", name, warning);
        }
        info!("Created container: {} ({})", name, response.id);

        Ok(response.id)
    }

    /// Start a container.
    ///
    /// # Errors
    ///
    /// Returns error if container start fails.
    pub async fn start_container(&self, container_id: &str) -> Result<()> {
        debug!("Starting container: {}", container_id);

        self.client
            .docker()
            .start_container(
                container_id,
                None::<bollard::container::StartContainerOptions<String>>,
            )
            .await?;

        Ok(())
    }

    /// Running flag and exit code of a container.
    ///
    /// # Errors
    ///
    /// Returns error if the container is missing or inspection fails.
    pub async fn container_status(&self, container_id: &str) -> Result<ContainerStatus> {
        let inspect = self
            .client
            .docker()
            .inspect_container(
                container_id,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => ContainerError::NotFound(container_id.to_string()),
                e => ContainerError::ApiError(e),
            })?;

        let state = inspect.state.ok_or_else(|| {
            ContainerError::Other(format!("Container {} has no state", container_id))
        })?;

        Ok(ContainerStatus {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    /// Stop a container.
    ///
    /// # Errors
    ///
    /// Returns error if container stop fails.
    pub async fn stop_container(&self, container_id: &str) -> Result<()> {
        debug!("Stopping container: {}", container_id);

        self.client
            .docker()
            .stop_container(
                container_id,
                Some(bollard::container::StopContainerOptions {
                    t: self.config.stop_timeout,
                }),
            )
            .await?;

        Ok(())
    }

    /// Remove a container.
    ///
    /// # Errors
    ///
    /// Returns error if container removal fails.
    pub async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        debug!("Removing container: {}", container_id);

        self.client
            .docker()
            .remove_container(
                container_id,
                Some(bollard::container::RemoveContainerOptions {
                    force,
                    v: true, // Remove associated volumes
                    ..Default::default()
                }),
            )
            .await?;

        Ok(())
    }

    /// Get container logs, stdout and stderr interleaved.
    ///
    /// # Errors
    ///
    /// Returns error if log retrieval fails.
    pub async fn logs(&self, container_id: &str, tail: Option<&str>) -> Result<String> {
        let mut stream = self.client.docker().logs(
            container_id,
            Some(bollard::container::LogsOptions {
                stdout: true,
                stderr: true,
                tail: tail.unwrap_or("all").to_string(),
                ..Default::default()
            }),
        );
        let mut output = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(log) => {
                    output.push_str(&log.to_string());
                }
                Err(e) => {
                    return Err(ContainerError::ApiError(e));
                }
            }
        }

        Ok(output)
    }

    /// Get the underlying client.
    pub fn client(&self) -> &ContainerClient {
        &self.client
    }
}

#[async_trait::async_trait]
impl ContainerEngine for ContainerOrchestrator {
    async fn create_and_start(&self, spec: &LaunchSpec) -> std::result::Result<ContainerHandle, EngineError> {
        let config = ContainerConfig::from_launch(spec)
            .map_err(|e| e.into_engine_error(EngineError::Create))?;

        let id = self
            .create_container(&config, &spec.name)
            .await
            .map_err(|e| e.into_engine_error(EngineError::Create))?;

        if let Err(e) = self.start_container(&id).await {
            // A created but never started container would otherwise leak
            if let Err(remove) = self.remove_container(&id, true).await {
                warn!("Failed to remove unstarted container {}: {}", spec.name, remove);
            }
            return Err(e.into_engine_error(EngineError::Start));
        }

        Ok(ContainerHandle::new(id))
    }

    async fn inspect(&self, handle: &ContainerHandle) -> std::result::Result<ContainerStatus, EngineError> {
        self.container_status(handle.as_str())
            .await
            .map_err(|e| e.into_engine_error(EngineError::Inspect))
    }

    async fn fetch_output(&self, handle: &ContainerHandle) -> std::result::Result<String, EngineError> {
        self.logs(handle.as_str(), None)
            .await
            .map_err(|e| e.into_engine_error(EngineError::Output))
    }

    async fn stop(&self, handle: &ContainerHandle) -> std::result::Result<(), EngineError> {
        self.stop_container(handle.as_str())
            .await
            .map_err(|e| e.into_engine_error(EngineError::Stop))
    }

    async fn remove(&self, handle: &ContainerHandle) -> std::result::Result<(), EngineError> {
        self.remove_container(handle.as_str(), true)
            .await
            .map_err(|e| e.into_engine_error(EngineError::Remove))
    }

    fn engine_name(&self) -> &'static str {
        "docker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerClientConfig;
    use std::collections::BTreeMap;

    async fn orchestrator() -> ContainerOrchestrator {
        let client = ContainerClient::with_config(ContainerClientConfig::default())
            .await
            .unwrap();
        ContainerOrchestrator::with_client(client, ContainerOrchestratorConfig::default())
    }

    #[test]
    fn test_default_stop_timeout() {
        let config = ContainerOrchestratorConfig::default();
        assert_eq!(config.stop_timeout, 10);
        assert!(config.auto_pull);
    }

    #[tokio::test]
    #[ignore] // Requires Docker/Podman
    async fn test_image_pull() {
        let orchestrator = orchestrator().await;
        orchestrator.ensure_image("alpine:latest").await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_engine_lifecycle() {
        let orchestrator = orchestrator().await;

        let spec = LaunchSpec {
            name: format!("ctrun_lifecycle_{}", uuid::Uuid::new_v4().simple()),
            image: "alpine:latest".to_string(),
            entrypoint: vec!["/bin/echo".to_string()],
            command: vec!["hello".to_string()],
            environment: BTreeMap::new(),
            labels: BTreeMap::new(),
        };

        let handle = orchestrator.create_and_start(&spec).await.unwrap();

        let mut status = orchestrator.inspect(&handle).await.unwrap();
        while status.running {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            status = orchestrator.inspect(&handle).await.unwrap();
        }
        assert_eq!(status.exit_code, Some(0));

        let output = orchestrator.fetch_output(&handle).await.unwrap();
        assert!(output.contains("hello"));

        orchestrator.remove(&handle).await.unwrap();
    }
}
