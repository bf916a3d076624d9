//! # ctrun
//!
//! A bounded-concurrency container test harness. A run is a list of tasks,
//! each naming an image, entrypoint, command, environment and a set of
//! assertions. Containers are started through a container engine with at most
//! N running at a time, polled until they exit, and judged on their captured
//! output and exit code. A single global timeout covers the whole batch.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: the core. Task descriptors, the assertion evaluator, the
//!   [`ContainerEngine`](task::ContainerEngine) capability and the [`Scheduler`](task::Scheduler)
//! - **[`container`]**: Docker/Podman engine built on bollard
//! - **[`cli`]**: argument parsing, TOML configuration loading and discovery
//! - **[`report`]**: console summary, JUnit XML and JSON reports
//!
//! ## Verdict rules
//!
//! - Assertions are conjunctive; an empty set passes when the container exits on its own
//! - Exit code 137 always fails, whatever the assertions say
//! - Tasks still outstanding at the global deadline fail with "task timed out"
//! - Verdicts are returned in input order
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ctrun::task::{Assertion, MockEngine, MockScript, Scheduler, SchedulerConfig, TaskDescriptor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = MockEngine::new().with_script("hello", MockScript::exits(0, "hello\n"));
//!     let scheduler = Scheduler::new(Arc::new(engine), SchedulerConfig::default());
//!
//!     let task = TaskDescriptor::new("hello", "alpine:latest")
//!         .with_entrypoint(["/bin/echo"])
//!         .with_command(["hello"])
//!         .with_assertion(Assertion::StringContains("hello".to_string()));
//!
//!     let verdicts = scheduler.run(vec![task]).await?;
//!     assert!(verdicts[0].passed);
//!     Ok(())
//! }
//! ```

/// Task model, assertion evaluation and the bounded-concurrency scheduler.
pub mod task;

/// Docker/Podman engine backend.
#[cfg(feature = "containers")]
pub mod container;

/// Result rendering: console, JUnit XML and JSON.
pub mod report;

/// Environment constants and path utilities.
///
/// Centralizes file names, label keys and built-in defaults.
pub mod env;

// CLI module for command-line interface
pub mod cli;

// Re-export main task types
pub use task::{
    Assertion, ContainerEngine, EngineError, Outcome, Scheduler, SchedulerConfig, SchedulerError,
    TaskDescriptor, Verdict,
};
