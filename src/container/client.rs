//! Docker/Podman client wrapper.
//!
//! Provides a simplified interface to the bollard Docker API with automatic
//! connection handling, fallback strategies, and health checking.

use crate::container::{ContainerError, Result};
use bollard::Docker;
use std::sync::Arc;
use tracing::{debug, info};

/// Container client configuration.
#[derive(Debug, Clone)]
pub struct ContainerClientConfig {
    /// Explicit engine endpoint (`unix://...`, `tcp://...` or `http://...`).
    /// When unset the local defaults and Podman sockets are tried.
    pub docker_url: Option<String>,
    /// Connection timeout in seconds
    pub timeout: u64,
}

impl Default for ContainerClientConfig {
    fn default() -> Self {
        Self {
            docker_url: None,
            timeout: 120,
        }
    }
}

/// Docker/Podman API client wrapper.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
}

impl ContainerClient {
    /// Connect with the given configuration and verify the runtime answers.
    ///
    /// # Errors
    ///
    /// Returns error if no runtime can be reached or the ping fails.
    pub async fn with_config(config: ContainerClientConfig) -> Result<Self> {
        let docker = match &config.docker_url {
            Some(url) => Self::connect_url(url, config.timeout)?,
            None => Self::connect(config.timeout)?,
        };

        let client = Self {
            docker: Arc::new(docker),
        };

        // Verify connection works
        client.ping().await?;

        Ok(client)
    }

    fn connect_url(url: &str, timeout: u64) -> Result<Docker> {
        debug!("Connecting to container runtime at {}", url);

        let docker = if url.starts_with("unix://") {
            Docker::connect_with_socket(url, timeout, bollard::API_DEFAULT_VERSION)
        } else if url.starts_with("tcp://") || url.starts_with("http://") {
            Docker::connect_with_http(url, timeout, bollard::API_DEFAULT_VERSION)
        } else {
            return Err(ContainerError::ConfigError(format!(
                "Unsupported docker_url scheme: {}",
                url
            )));
        };

        docker.map_err(|e| ContainerError::Unavailable(format!("{}: {}", url, e)))
    }

    /// Connect to Docker or Podman daemon.
    ///
    /// Tries multiple connection strategies in order:
    /// 1. Local defaults (DOCKER_HOST, Unix socket or Windows named pipe)
    /// 2. Rootless Podman socket
    /// 3. System Podman socket
    fn connect(timeout: u64) -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(home) = std::env::var("HOME") {
                sockets.push(format!("unix://{}/run/podman/podman.sock", home));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(&socket, timeout, bollard::API_DEFAULT_VERSION) {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman socket {} failed: {}", socket, e);
                    }
                }
            }
        }

        Err(ContainerError::Unavailable(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.".to_string()
        ))
    }

    /// Ping the container runtime to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if ping fails.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| {
            ContainerError::Unavailable(format!("Failed to ping container runtime: {}", e))
        })?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    /// Get version information from the container runtime.
    ///
    /// # Errors
    ///
    /// Returns error if version query fails.
    pub async fn version(&self) -> Result<bollard::models::SystemVersion> {
        self.docker
            .version()
            .await
            .map_err(|e| ContainerError::Other(format!("Failed to get version: {}", e)))
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Check if the runtime is Docker or Podman.
    ///
    /// # Errors
    ///
    /// Returns error if runtime detection fails.
    pub async fn runtime_type(&self) -> Result<RuntimeType> {
        let version = self.version().await?;

        let podman = version
            .components
            .unwrap_or_default()
            .iter()
            .any(|component| component.name.to_lowercase().contains("podman"));

        Ok(if podman {
            RuntimeType::Podman
        } else {
            RuntimeType::Docker
        })
    }

    /// Check if an image exists locally.
    ///
    /// # Errors
    ///
    /// Returns error if image inspection fails.
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ContainerError::ApiError(e)),
        }
    }
}

/// Type of container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "Docker"),
            RuntimeType::Podman => write!(f, "Podman"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_scheme() {
        let result = ContainerClient::connect_url("ftp://localhost:2375", 5);
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[tokio::test]
    #[ignore] // Requires Docker/Podman to be running
    async fn test_client_connection() {
        let client = ContainerClient::with_config(ContainerClientConfig::default())
            .await
            .unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_runtime_detection() {
        let client = ContainerClient::with_config(ContainerClientConfig::default())
            .await
            .unwrap();
        let runtime_type = client.runtime_type().await.unwrap();
        println!("Runtime type: {}", runtime_type);
    }
}
