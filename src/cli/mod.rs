//! CLI-specific functionality for the container test runner
//!
//! This module contains argument parsing, configuration loading and
//! configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, ExecutionMode, RunConfig, ValidateConfig};
pub use config::{
    CommandLine, ConfigDiscovery, ConfigError, RunOverrides, RunnerConfig, TaskConfig,
    split_command,
};
