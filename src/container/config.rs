//! Container creation settings.

use crate::container::{ContainerError, Result};
use crate::task::LaunchSpec;
use std::collections::HashMap;

/// Container configuration builder.
#[derive(Default)]
pub struct ContainerConfigBuilder {
    image: Option<String>,
    cmd: Vec<String>,
    entrypoint: Vec<String>,
    env: Vec<String>,
    labels: HashMap<String, String>,
}

impl ContainerConfigBuilder {
    /// Create a new container configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container image.
    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the command to run in the container.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = cmd.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set the entrypoint for the container.
    pub fn entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = entrypoint.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Add an environment variable.
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push(format!("{}={}", key.into(), value.into()));
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in envs {
            self.env.push(format!("{}={}", k.into(), v.into()));
        }
        self
    }

    /// Add a label to the container.
    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Build the container configuration.
    ///
    /// Empty entrypoint and command fall back to the image defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the image is missing.
    pub fn build(self) -> Result<ContainerConfig> {
        let image = self
            .image
            .filter(|image| !image.is_empty())
            .ok_or_else(|| ContainerError::ConfigError("Image is required".to_string()))?;

        Ok(ContainerConfig {
            image,
            cmd: non_empty(self.cmd),
            entrypoint: non_empty(self.entrypoint),
            env: non_empty(self.env),
            labels: if self.labels.is_empty() {
                None
            } else {
                Some(self.labels)
            },
        })
    }
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() { None } else { Some(values) }
}

/// Container configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    /// Image name
    pub image: String,
    /// Command to run
    pub cmd: Option<Vec<String>>,
    /// Entrypoint
    pub entrypoint: Option<Vec<String>>,
    /// Environment variables as `KEY=value`
    pub env: Option<Vec<String>>,
    /// Labels
    pub labels: Option<HashMap<String, String>>,
}

impl ContainerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ContainerConfigBuilder {
        ContainerConfigBuilder::new()
    }

    /// Configuration for a scheduler launch request
    pub fn from_launch(spec: &LaunchSpec) -> Result<Self> {
        let mut builder = Self::builder()
            .image(spec.image.as_str())
            .entrypoint(spec.entrypoint.iter().cloned())
            .cmd(spec.command.iter().cloned())
            .envs(spec.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        for (key, value) in &spec.labels {
            builder = builder.label(key.as_str(), value.as_str());
        }

        builder.build()
    }

    /// Convert into the bollard create request body.
    pub fn to_bollard(&self) -> bollard::container::Config<String> {
        bollard::container::Config {
            image: Some(self.image.clone()),
            cmd: self.cmd.clone(),
            entrypoint: self.entrypoint.clone(),
            env: self.env.clone(),
            labels: self.labels.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_basic_config() {
        let config = ContainerConfig::builder()
            .image("alpine:latest")
            .cmd(vec!["echo", "hello"])
            .build()
            .unwrap();

        assert_eq!(config.image, "alpine:latest");
        assert_eq!(
            config.cmd,
            Some(vec!["echo".to_string(), "hello".to_string()])
        );
        assert_eq!(config.entrypoint, None);
        assert_eq!(config.env, None);
    }

    #[test]
    fn test_environment_variables() {
        let config = ContainerConfig::builder()
            .image("alpine:latest")
            .env("FOO", "bar")
            .env("BAZ", "qux")
            .build()
            .unwrap();

        let env = config.env.unwrap();
        assert!(env.contains(&"FOO=bar".to_string()));
        assert!(env.contains(&"BAZ=qux".to_string()));
    }

    #[test]
    fn test_missing_image_error() {
        let result = ContainerConfig::builder().cmd(vec!["echo"]).build();

        assert!(result.is_err());
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[test]
    fn test_from_launch_spec() {
        let spec = LaunchSpec {
            name: "1019_120000_hello".to_string(),
            image: "alpine:latest".to_string(),
            entrypoint: vec!["/bin/echo".to_string()],
            command: vec!["hello".to_string()],
            environment: BTreeMap::from([("ENVIRON".to_string(), "ci".to_string())]),
            labels: BTreeMap::from([("ctrun.task".to_string(), "hello".to_string())]),
        };

        let config = ContainerConfig::from_launch(&spec).unwrap();
        let body = config.to_bollard();

        assert_eq!(body.image.as_deref(), Some("alpine:latest"));
        assert_eq!(body.entrypoint, Some(vec!["/bin/echo".to_string()]));
        assert_eq!(body.cmd, Some(vec!["hello".to_string()]));
        assert_eq!(body.env, Some(vec!["ENVIRON=ci".to_string()]));
        assert_eq!(
            body.labels.unwrap().get("ctrun.task").map(String::as_str),
            Some("hello")
        );
    }
}
