//! Task descriptors, execution records and verdicts.

use crate::task::assertions::evaluate;
use crate::task::engine::ContainerHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Exit code reported by the engine for a container killed with SIGKILL
pub const FORCED_KILL_EXIT_CODE: i64 = 137;

/// Reason recorded for every task still outstanding when the deadline passes
pub const TIMEOUT_REASON: &str = "task timed out";

/// Reason recorded when a container exits with [`FORCED_KILL_EXIT_CODE`]
pub const FORCED_KILL_REASON: &str = "exit code 137 indicates forced kill";

/// Fully resolved definition of one container run.
///
/// Built by the configuration loader after all defaults and overrides have
/// been merged; the scheduler never changes it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskDescriptor {
    pub name: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub assertions: Vec<Assertion>,
}

impl TaskDescriptor {
    /// Create a descriptor with no entrypoint, command, environment or assertions
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            entrypoint: Vec::new(),
            command: Vec::new(),
            environment: BTreeMap::new(),
            assertions: Vec::new(),
        }
    }

    /// Set the entrypoint argv
    pub fn with_entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = entrypoint.into_iter().map(Into::into).collect();
        self
    }

    /// Set the command argv
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable; a later value for the same key wins
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Append an assertion
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }
}

/// A single pass/fail condition evaluated against a finished container.
///
/// Serialized externally tagged in kebab-case, so configuration files write
/// `{ string-contains = "hello" }`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Assertion {
    /// Output contains the literal text (case-sensitive)
    StringContains(String),
    /// The regular expression matches somewhere in the output
    RegexMatch(String),
    /// The container exit code equals the value
    ExitCodeEquals(i64),
}

impl Assertion {
    /// Kebab-case name of the assertion kind
    pub fn kind(&self) -> &'static str {
        match self {
            Assertion::StringContains(_) => "string-contains",
            Assertion::RegexMatch(_) => "regex-match",
            Assertion::ExitCodeEquals(_) => "exit-code-equals",
        }
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assertion::StringContains(expected) | Assertion::RegexMatch(expected) => {
                write!(f, "{}({:?})", self.kind(), expected)
            }
            Assertion::ExitCodeEquals(expected) => write!(f, "{}({})", self.kind(), expected),
        }
    }
}

/// Lifecycle state of an admitted task
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a free running slot
    Queued,
    /// Create/start call in flight
    Starting,
    /// Container started, not yet observed as exited
    Running,
    /// Container exited on its own and was judged
    Completed,
    /// Still outstanding when the global deadline passed
    TimedOut,
    /// An engine call failed before the task could be judged
    EngineError,
}

impl TaskState {
    /// Whether the task has produced its verdict
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::TimedOut | TaskState::EngineError
        )
    }

    /// Whether the task holds one of the running slots
    pub fn occupies_slot(self) -> bool {
        matches!(self, TaskState::Starting | TaskState::Running)
    }
}

/// Scheduler-owned execution record of one task
#[derive(Clone, Debug)]
pub struct RunningTask {
    pub descriptor: Arc<TaskDescriptor>,
    /// Engine identity, set once create+start succeeded
    pub handle: Option<ContainerHandle>,
    pub started_at: Option<Instant>,
    pub state: TaskState,
}

impl RunningTask {
    pub fn new(descriptor: TaskDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            handle: None,
            started_at: None,
            state: TaskState::Queued,
        }
    }

    /// Time since the task was admitted
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|at| at.elapsed())
    }
}

/// How a task reached its verdict
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The container exited and was judged against its assertions
    Completed,
    /// The global deadline passed first
    TimedOut,
    /// The engine failed to create, start or inspect the container
    EngineError,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::TimedOut => write!(f, "timed out"),
            Outcome::EngineError => write!(f, "engine error"),
        }
    }
}

/// Final, immutable judgement of one task
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Verdict {
    pub task_name: String,
    pub passed: bool,
    pub outcome: Outcome,
    /// `None` when the container never reported one (killed, never started)
    pub exit_code: Option<i64>,
    pub reason: String,
    pub raw_output: String,
    pub container: Option<String>,
    pub duration: Option<Duration>,
}

impl Verdict {
    /// Judge a container that exited on its own.
    ///
    /// Exit code 137 always fails, whatever the assertions say.
    pub fn completed(
        task: &RunningTask,
        exit_code: Option<i64>,
        output: String,
    ) -> Self {
        let (passed, reason) = match exit_code {
            Some(FORCED_KILL_EXIT_CODE) => (false, FORCED_KILL_REASON.to_string()),
            Some(code) => evaluate(&task.descriptor.assertions, &output, code),
            None => (false, "container exited without reporting an exit code".to_string()),
        };

        Self {
            task_name: task.descriptor.name.clone(),
            passed,
            outcome: Outcome::Completed,
            exit_code,
            reason,
            raw_output: output,
            container: task.handle.as_ref().map(ToString::to_string),
            duration: task.elapsed(),
        }
    }

    /// Verdict for a task still outstanding at the global deadline
    pub fn timed_out(task: &RunningTask) -> Self {
        Self {
            task_name: task.descriptor.name.clone(),
            passed: false,
            outcome: Outcome::TimedOut,
            exit_code: None,
            reason: TIMEOUT_REASON.to_string(),
            raw_output: String::new(),
            container: task.handle.as_ref().map(ToString::to_string),
            duration: task.elapsed(),
        }
    }

    /// Verdict for a task whose engine call failed
    pub fn engine_error(task: &RunningTask, error: impl fmt::Display) -> Self {
        Self {
            task_name: task.descriptor.name.clone(),
            passed: false,
            outcome: Outcome::EngineError,
            exit_code: None,
            reason: format!("engine error: {}", error),
            raw_output: String::new(),
            container: task.handle.as_ref().map(ToString::to_string),
            duration: task.elapsed(),
        }
    }
}
