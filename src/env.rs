//! Environment constants for the container test runner.
//!
//! This module centralizes file names, environment variable names, container
//! labels and built-in defaults used throughout the application, making them
//! easier to maintain and modify.

use std::path::{Path, PathBuf};

/// Local application directory name (hidden directory like .git, .vscode)
pub const CTRUN_DIR_NAME: &str = ".ctrun";

/// Configuration file name inside [`CTRUN_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "ctrun.toml";

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "CTRUN_CONFIG";

/// Labels attached to every container started by a run
pub mod labels {
    /// Name of the task the container belongs to
    pub const TASK: &str = "ctrun.task";

    /// Unique identifier of the batch run
    pub const RUN: &str = "ctrun.run";
}

/// Built-in configuration defaults
pub mod defaults {
    /// Image used when a task does not name one
    pub const IMAGE: &str = "kbase/narrative:latest";

    /// Entrypoint used when a task does not name one
    pub const ENTRYPOINT: &str = "headless-narrative";

    /// Seconds between two polls of the running containers
    pub const POLL_INTERVAL_SECS: u64 = 5;

    /// Number of containers allowed to run at the same time
    pub const MAX_RUNNING_TASKS: usize = 3;

    /// Seconds the engine waits after SIGTERM before sending SIGKILL
    pub const STOP_GRACE_SECS: u64 = 10;

    /// Format of the run timestamp used to prefix container names
    pub const NAME_PREFIX_FORMAT: &str = "%m%d_%H%M%S";

    /// Name of the JUnit test suite
    pub const SUITE_NAME: &str = "ctrun";
}

/// Build the local .ctrun directory path from a directory
pub fn ctrun_dir_path(root: &Path) -> PathBuf {
    root.join(CTRUN_DIR_NAME)
}

/// Build the local configuration file path (.ctrun/config.toml)
pub fn local_config_file_path(root: &Path) -> PathBuf {
    ctrun_dir_path(root).join(CONFIG_FILE_NAME)
}
