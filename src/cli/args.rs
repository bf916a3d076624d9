//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `run`: Run every task of a configuration file and report the verdicts
//! - `validate`: Load and validate a configuration file, print the resolved tasks
//! - `show-config`: Show configuration discovery information

use super::config::RunOverrides;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Run(RunConfig),
    Validate(ValidateConfig),
    ShowConfig,
}

#[derive(Debug)]
pub struct RunConfig {
    pub config_path: Option<PathBuf>,
    pub overrides: RunOverrides,
    pub verbose: bool,
}

#[derive(Debug)]
pub struct ValidateConfig {
    pub config_path: Option<PathBuf>,
    pub verbose: bool,
}

#[derive(Debug, Parser)]
#[command(name = "ctrun")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run declared containers as integration tests and assert on their output")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run every task of a configuration file
    Run {
        /// Configuration file (discovered when omitted)
        #[arg(env = "CTRUN_CONFIG")]
        config: Option<PathBuf>,
        /// Maximum number of containers running at the same time
        #[arg(short = 'j', long = "max-running", value_name = "N")]
        max_running: Option<usize>,
        /// Global timeout in seconds, measured from the first container start
        #[arg(short = 't', long = "timeout", value_name = "SECS")]
        timeout: Option<u64>,
        /// Stop containers still running when the timeout fires
        #[arg(long = "kill-on-timeout")]
        kill_on_timeout: bool,
        /// Keep containers of failed tasks for inspection
        #[arg(long = "keep-failed")]
        keep_failed: bool,
        /// Write a JUnit XML report to this path
        #[arg(long = "junit", value_name = "FILE")]
        junit: Option<PathBuf>,
        /// Write the verdicts as JSON to this path
        #[arg(long = "json", value_name = "FILE")]
        json: Option<PathBuf>,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Validate a configuration file and print the resolved tasks
    Validate {
        /// Configuration file (discovered when omitted)
        #[arg(env = "CTRUN_CONFIG")]
        config: Option<PathBuf>,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                config,
                max_running,
                timeout,
                kill_on_timeout,
                keep_failed,
                junit,
                json,
                verbose,
            }) => {
                if *max_running == Some(0) {
                    return Err("--max-running must be at least 1".to_string());
                }
                if *timeout == Some(0) {
                    return Err("--timeout must be greater than zero".to_string());
                }

                Ok(ExecutionMode::Run(RunConfig {
                    config_path: config.clone(),
                    overrides: RunOverrides {
                        max_running_tasks: *max_running,
                        timeout_secs: *timeout,
                        kill_on_timeout: *kill_on_timeout,
                        keep_failed: *keep_failed,
                        junit_output: junit.clone(),
                        json_output: json.clone(),
                    },
                    verbose: *verbose,
                }))
            }
            Some(Commands::Validate { config, verbose }) => {
                Ok(ExecutionMode::Validate(ValidateConfig {
                    config_path: config.clone(),
                    verbose: *verbose,
                }))
            }
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => {
                Err("No command specified. Use 'ctrun --help' to see available commands.".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command() {
        let args = Args {
            command: Some(Commands::Run {
                config: Some(PathBuf::from("ctrun.toml")),
                max_running: Some(5),
                timeout: Some(60),
                kill_on_timeout: true,
                keep_failed: false,
                junit: Some(PathBuf::from("report.xml")),
                json: None,
                verbose: true,
            }),
        };
        let mode = args.mode().unwrap();

        if let ExecutionMode::Run(config) = mode {
            assert_eq!(config.config_path, Some(PathBuf::from("ctrun.toml")));
            assert_eq!(config.overrides.max_running_tasks, Some(5));
            assert_eq!(config.overrides.timeout_secs, Some(60));
            assert!(config.overrides.kill_on_timeout);
            assert!(!config.overrides.keep_failed);
            assert!(config.verbose);
        } else {
            panic!("Expected Run mode");
        }
    }

    #[test]
    fn test_run_rejects_zero_values() {
        let args = Args {
            command: Some(Commands::Run {
                config: None,
                max_running: Some(0),
                timeout: None,
                kill_on_timeout: false,
                keep_failed: false,
                junit: None,
                json: None,
                verbose: false,
            }),
        };
        assert!(args.mode().is_err());
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "ctrun",
            "run",
            "suite.toml",
            "--max-running",
            "2",
            "--timeout",
            "90",
            "--keep-failed",
            "--json",
            "out.json",
        ])
        .unwrap();

        match args.mode().unwrap() {
            ExecutionMode::Run(config) => {
                assert_eq!(config.config_path, Some(PathBuf::from("suite.toml")));
                assert_eq!(config.overrides.max_running_tasks, Some(2));
                assert_eq!(config.overrides.timeout_secs, Some(90));
                assert!(config.overrides.keep_failed);
                assert_eq!(config.overrides.json_output, Some(PathBuf::from("out.json")));
            }
            other => panic!("Expected Run mode, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_and_show_config() {
        let args = Args::try_parse_from(["ctrun", "validate", "suite.toml", "-v"]).unwrap();
        assert!(matches!(
            args.mode().unwrap(),
            ExecutionMode::Validate(ValidateConfig { verbose: true, .. })
        ));

        let args = Args::try_parse_from(["ctrun", "show-config"]).unwrap();
        assert!(matches!(args.mode().unwrap(), ExecutionMode::ShowConfig));
    }

    #[test]
    fn test_no_command_error() {
        let args = Args { command: None };
        let result = args.mode();
        assert!(result.is_err());
    }
}
