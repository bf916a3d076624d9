//! Configuration discovery and loading
//!
//! A run is described by one TOML file holding the global settings and an
//! ordered `[[tasks]]` array. The file is found through this hierarchy:
//! 1. Path given on the command line
//! 2. `CTRUN_CONFIG` environment variable
//! 3. Current directory: ./ctrun.toml or ./.ctrun/config.toml
//!
//! Loading merges every task with the global defaults and validates the
//! result, so the scheduler only ever sees fully resolved [`TaskDescriptor`]s.

use crate::env;
use crate::task::{Assertion, SchedulerConfig, TaskDescriptor};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no configuration file found (tried {0})")]
    NotFound(String),

    #[error("no tasks configured")]
    NoTasks,

    #[error("task names must match [a-zA-Z0-9_]+: {0:?}")]
    IllegalTaskName(String),

    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("task {task}: invalid regex {pattern:?}: {message}")]
    InvalidRegex {
        task: String,
        pattern: String,
        message: String,
    },

    #[error("task {task}: invalid {field}: {message}")]
    InvalidCommand {
        task: String,
        field: &'static str,
        message: String,
    },

    #[error("task {0}: no image configured")]
    MissingImage(String),

    #[error("invalid setting {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
}

/// Entrypoint or command: a shell-style string or an explicit argv array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Args(Vec<String>),
}

impl CommandLine {
    /// Split into argv
    pub fn to_argv(&self) -> Result<Vec<String>, String> {
        match self {
            CommandLine::Line(line) => split_command(line),
            CommandLine::Args(args) => Ok(args.clone()),
        }
    }
}

impl Default for CommandLine {
    fn default() -> Self {
        CommandLine::Line(env::defaults::ENTRYPOINT.to_string())
    }
}

/// Split a command line into words.
///
/// Whitespace separates words. Single quotes keep their content verbatim,
/// double quotes allow `\"` and `\\`, and a backslash outside quotes escapes
/// the next character.
pub fn split_command(line: &str) -> Result<Vec<String>, String> {
    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    word.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\')) => word.push(next),
                    Some(next) => {
                        word.push('\\');
                        word.push(next);
                    }
                    None => return Err("trailing backslash".to_string()),
                },
                _ => word.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    let next = chars.next().ok_or_else(|| "trailing backslash".to_string())?;
                    word.push(next);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut word));
                        in_word = false;
                    }
                }
                c => {
                    word.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

/// One `[[tasks]]` entry; unset fields fall back to the global values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandLine>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

/// Settings given on the command line, applied on top of the file
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub max_running_tasks: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub kill_on_timeout: bool,
    pub keep_failed: bool,
    pub junit_output: Option<PathBuf>,
    pub json_output: Option<PathBuf>,
}

/// Contents of a configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Engine endpoint; local defaults when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_url: Option<String>,
    pub image: String,
    pub entrypoint: CommandLine,
    pub poll_interval_secs: u64,
    pub max_running_tasks: usize,
    pub delete_failed: bool,
    pub kill_on_timeout: bool,
    /// Global timeout; no deadline when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub stop_grace_secs: u64,
    pub auto_pull: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub junit_output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_output: Option<PathBuf>,
    /// Environment shared by every task
    pub environment: BTreeMap<String, String>,
    pub tasks: Vec<TaskConfig>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            docker_url: None,
            image: env::defaults::IMAGE.to_string(),
            entrypoint: CommandLine::default(),
            poll_interval_secs: env::defaults::POLL_INTERVAL_SECS,
            max_running_tasks: env::defaults::MAX_RUNNING_TASKS,
            delete_failed: true,
            kill_on_timeout: false,
            timeout_secs: None,
            stop_grace_secs: env::defaults::STOP_GRACE_SECS,
            auto_pull: true,
            log_level: None,
            junit_output: None,
            json_output: None,
            environment: BTreeMap::new(),
            tasks: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Load from TOML file without validating
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from TOML file and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::from_toml_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides
    pub fn apply_overrides(&mut self, overrides: &RunOverrides) {
        if let Some(max) = overrides.max_running_tasks {
            self.max_running_tasks = max;
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.timeout_secs = Some(timeout);
        }
        if overrides.kill_on_timeout {
            self.kill_on_timeout = true;
        }
        if overrides.keep_failed {
            self.delete_failed = false;
        }
        if let Some(path) = &overrides.junit_output {
            self.junit_output = Some(path.clone());
        }
        if let Some(path) = &overrides.json_output {
            self.json_output = Some(path.clone());
        }
    }

    /// Check global settings and resolve every task once
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_running_tasks == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_running_tasks",
                message: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.stop_grace_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "stop_grace_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        self.log_level()?;
        self.resolve_tasks()?;
        Ok(())
    }

    /// Configured log level, if any
    pub fn log_level(&self) -> Result<Option<tracing::Level>, ConfigError> {
        self.log_level
            .as_deref()
            .map(|level| {
                level
                    .parse::<tracing::Level>()
                    .map_err(|_| ConfigError::InvalidLogLevel(level.to_string()))
            })
            .transpose()
    }

    /// Merge every task with the global settings, in file order
    pub fn resolve_tasks(&self) -> Result<Vec<TaskDescriptor>, ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::NoTasks);
        }

        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(self.tasks.len());

        for task in &self.tasks {
            if !is_legal_task_name(&task.name) {
                return Err(ConfigError::IllegalTaskName(task.name.clone()));
            }
            if !seen.insert(task.name.as_str()) {
                return Err(ConfigError::DuplicateTask(task.name.clone()));
            }
            descriptors.push(self.resolve_task(task)?);
        }

        debug!("Resolved {} tasks", descriptors.len());
        Ok(descriptors)
    }

    fn resolve_task(&self, task: &TaskConfig) -> Result<TaskDescriptor, ConfigError> {
        let image = task.image.as_deref().unwrap_or(&self.image);
        if image.trim().is_empty() {
            return Err(ConfigError::MissingImage(task.name.clone()));
        }

        let argv = |field: &'static str, line: &CommandLine| {
            line.to_argv().map_err(|message| ConfigError::InvalidCommand {
                task: task.name.clone(),
                field,
                message,
            })
        };

        // An empty entrypoint keeps the image's own
        let entrypoint = argv("entrypoint", task.entrypoint.as_ref().unwrap_or(&self.entrypoint))?;

        let command = match &task.command {
            Some(line) => {
                let command = argv("command", line)?;
                if command.is_empty() {
                    return Err(ConfigError::InvalidCommand {
                        task: task.name.clone(),
                        field: "command",
                        message: "must not be empty".to_string(),
                    });
                }
                command
            }
            None => Vec::new(),
        };

        for assertion in &task.assertions {
            if let Assertion::RegexMatch(pattern) = assertion {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
                    task: task.name.clone(),
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
            }
        }

        let mut environment = self.environment.clone();
        environment.extend(task.environment.clone());

        Ok(TaskDescriptor {
            name: task.name.clone(),
            image: image.to_string(),
            entrypoint,
            command,
            environment,
            assertions: task.assertions.clone(),
        })
    }

    /// Scheduler settings for this configuration, with a fresh name prefix
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_running_tasks: self.max_running_tasks,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            global_timeout: self.timeout_secs.map(Duration::from_secs),
            kill_on_timeout: self.kill_on_timeout,
            delete_failed: self.delete_failed,
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            name_prefix: SchedulerConfig::timestamp_prefix(),
        }
    }

    #[cfg(feature = "containers")]
    pub fn client_config(&self) -> crate::container::ContainerClientConfig {
        crate::container::ContainerClientConfig {
            docker_url: self.docker_url.clone(),
            ..Default::default()
        }
    }

    #[cfg(feature = "containers")]
    pub fn orchestrator_config(&self) -> crate::container::ContainerOrchestratorConfig {
        crate::container::ContainerOrchestratorConfig {
            auto_pull: self.auto_pull,
            stop_timeout: i64::try_from(self.stop_grace_secs).unwrap_or(i64::MAX),
        }
    }
}

fn is_legal_task_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Pick the configuration file: the explicit path if given, otherwise the
    /// first existing candidate of the discovery hierarchy
    pub fn resolve(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        if let Some(found) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", found);
            return Ok(found);
        }

        let tried = Self::get_config_candidates()
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::NotFound(tried))
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = Self::get_config_candidates();

        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Get list of configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let from_env = std_env::var_os(env::CONFIG_ENV_VAR).map(PathBuf::from);
        let current_dir = std_env::current_dir().ok();
        Self::candidates_in(current_dir.as_deref(), from_env)
    }

    fn candidates_in(current_dir: Option<&Path>, from_env: Option<PathBuf>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(path) = from_env {
            candidates.push(path);
        }

        if let Some(dir) = current_dir {
            candidates.push(dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(dir));
        }

        candidates
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();
        println!("  0. --config / positional argument (highest priority)");

        let candidates = Self::get_config_candidates();
        for (i, candidate) in candidates.iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        if let Some(found) = Self::find_config_file() {
            println!("Active configuration: {:?}", found);
        } else {
            println!("Active configuration: none (a configuration file is required to run)");
        }
    }
}
