//! In-memory container engine with scripted behaviour.
//!
//! Containers "run" for a scripted duration measured on the tokio clock, so
//! tests driven with a paused clock are fully deterministic. The engine
//! records every call and the peak number of live containers.

use crate::env;
use crate::task::engine::{
    ContainerEngine, ContainerHandle, ContainerStatus, EngineError, LaunchSpec,
};
use crate::task::types::FORCED_KILL_EXIT_CODE;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Behaviour of one mocked container
#[derive(Clone, Debug)]
pub struct MockScript {
    /// How long the container runs before exiting on its own
    pub runtime: Duration,
    pub exit_code: i64,
    pub output: String,
    /// Time the create+start call takes
    pub start_delay: Duration,
    pub start_error: Option<String>,
    pub inspect_error: Option<String>,
    /// Panic inside the inspect call with this message
    pub inspect_panic: Option<String>,
    pub output_error: Option<String>,
    pub stop_error: Option<String>,
    pub remove_error: Option<String>,
    /// Remove calls never complete
    pub remove_hangs: bool,
}

impl MockScript {
    /// Container that exits immediately with `exit_code` after printing `output`
    pub fn exits(exit_code: i64, output: impl Into<String>) -> Self {
        Self {
            runtime: Duration::ZERO,
            exit_code,
            output: output.into(),
            start_delay: Duration::ZERO,
            start_error: None,
            inspect_error: None,
            inspect_panic: None,
            output_error: None,
            stop_error: None,
            remove_error: None,
            remove_hangs: false,
        }
    }

    /// Container that never exits on its own
    pub fn hangs() -> Self {
        Self::exits(0, "").running_for(Duration::MAX)
    }

    pub fn running_for(mut self, runtime: Duration) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn starting_after(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn failing_start(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    pub fn failing_inspect(mut self, message: impl Into<String>) -> Self {
        self.inspect_error = Some(message.into());
        self
    }

    pub fn panicking_inspect(mut self, message: impl Into<String>) -> Self {
        self.inspect_panic = Some(message.into());
        self
    }

    pub fn failing_output(mut self, message: impl Into<String>) -> Self {
        self.output_error = Some(message.into());
        self
    }

    pub fn failing_stop(mut self, message: impl Into<String>) -> Self {
        self.stop_error = Some(message.into());
        self
    }

    pub fn failing_remove(mut self, message: impl Into<String>) -> Self {
        self.remove_error = Some(message.into());
        self
    }

    pub fn hanging_remove(mut self) -> Self {
        self.remove_hangs = true;
        self
    }
}

impl Default for MockScript {
    fn default() -> Self {
        Self::exits(0, "")
    }
}

/// Engine call recorded by [`MockEngine`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    Start { name: String },
    Inspect { task: String },
    FetchOutput { task: String },
    Stop { task: String },
    Remove { task: String },
}

#[derive(Debug)]
struct MockContainer {
    task: String,
    script: MockScript,
    started_at: Instant,
    stopped_at: Option<Instant>,
    /// Still counted as live in the concurrency statistics
    live: bool,
}

impl MockContainer {
    fn exits_at(&self) -> Option<Instant> {
        self.started_at.checked_add(self.script.runtime)
    }

    fn status(&self, now: Instant) -> ContainerStatus {
        let natural_exit = self.exits_at().filter(|&at| at <= now);
        match (self.stopped_at, natural_exit) {
            (Some(stopped), Some(exited)) if exited <= stopped => {
                ContainerStatus::exited(self.script.exit_code)
            }
            (Some(_), _) => ContainerStatus::exited(FORCED_KILL_EXIT_CODE),
            (None, Some(_)) => ContainerStatus::exited(self.script.exit_code),
            (None, None) => ContainerStatus::running(),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<ContainerHandle, MockContainer>,
    next_id: u64,
    live: usize,
    max_live: usize,
    calls: Vec<MockCall>,
}

impl MockState {
    fn retire(&mut self, handle: &ContainerHandle) {
        if let Some(container) = self.containers.get_mut(handle) {
            if container.live {
                container.live = false;
                self.live -= 1;
            }
        }
    }
}

/// Scripted in-memory [`ContainerEngine`]
#[derive(Debug, Default)]
pub struct MockEngine {
    scripts: HashMap<String, MockScript>,
    default_script: MockScript,
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the container of the task named `task`
    pub fn with_script(mut self, task: impl Into<String>, script: MockScript) -> Self {
        self.scripts.insert(task.into(), script);
        self
    }

    /// Script used for tasks without their own
    pub fn with_default_script(mut self, script: MockScript) -> Self {
        self.default_script = script;
        self
    }

    /// Every call in the order it was made
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Container names passed to successful and failed start calls
    pub fn started(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Start { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Tasks whose container received a stop call
    pub fn stopped(&self) -> Vec<String> {
        self.tasks_for(|call| match call {
            MockCall::Stop { task } => Some(task),
            _ => None,
        })
    }

    /// Tasks whose container received a remove call
    pub fn removed(&self) -> Vec<String> {
        self.tasks_for(|call| match call {
            MockCall::Remove { task } => Some(task),
            _ => None,
        })
    }

    /// Peak number of containers started and not yet seen as finished
    pub fn max_concurrent(&self) -> usize {
        self.lock().max_live
    }

    /// Containers created and not removed
    pub fn remaining_containers(&self) -> usize {
        self.lock().containers.len()
    }

    fn tasks_for<F>(&self, select: F) -> Vec<String>
    where
        F: Fn(&MockCall) -> Option<&String>,
    {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| select(call).cloned())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn script_for(&self, task: &str) -> MockScript {
        self.scripts
            .get(task)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone())
    }

    fn script_of(&self, handle: &ContainerHandle) -> Result<MockScript, EngineError> {
        self.lock()
            .containers
            .get(handle)
            .map(|container| container.script.clone())
            .ok_or_else(|| EngineError::NotFound(handle.to_string()))
    }

    fn task_of(&self, handle: &ContainerHandle) -> Result<String, EngineError> {
        self.lock()
            .containers
            .get(handle)
            .map(|container| container.task.clone())
            .ok_or_else(|| EngineError::NotFound(handle.to_string()))
    }
}

#[async_trait::async_trait]
impl ContainerEngine for MockEngine {
    async fn create_and_start(&self, spec: &LaunchSpec) -> Result<ContainerHandle, EngineError> {
        let task = spec
            .labels
            .get(env::labels::TASK)
            .cloned()
            .unwrap_or_else(|| spec.name.clone());
        let script = self.script_for(&task);

        self.lock().calls.push(MockCall::Start {
            name: spec.name.clone(),
        });

        if !script.start_delay.is_zero() {
            tokio::time::sleep(script.start_delay).await;
        }
        if let Some(message) = &script.start_error {
            return Err(EngineError::Start(message.clone()));
        }

        let mut state = self.lock();
        state.next_id += 1;
        let handle = ContainerHandle::new(format!("mock-{}", state.next_id));
        state.containers.insert(
            handle.clone(),
            MockContainer {
                task,
                script,
                started_at: Instant::now(),
                stopped_at: None,
                live: true,
            },
        );
        state.live += 1;
        state.max_live = state.max_live.max(state.live);

        Ok(handle)
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, EngineError> {
        let task = self.task_of(handle)?;
        self.lock().calls.push(MockCall::Inspect { task });

        if let Some(message) = self.script_of(handle)?.inspect_panic {
            panic!("{}", message);
        }

        let mut state = self.lock();

        let container = state
            .containers
            .get(handle)
            .ok_or_else(|| EngineError::NotFound(handle.to_string()))?;
        if let Some(message) = &container.script.inspect_error {
            return Err(EngineError::Inspect(message.clone()));
        }

        let status = container.status(Instant::now());
        if !status.running {
            state.retire(handle);
        }
        Ok(status)
    }

    async fn fetch_output(&self, handle: &ContainerHandle) -> Result<String, EngineError> {
        let task = self.task_of(handle)?;
        let mut state = self.lock();
        state.calls.push(MockCall::FetchOutput { task });

        let container = state
            .containers
            .get(handle)
            .ok_or_else(|| EngineError::NotFound(handle.to_string()))?;
        match &container.script.output_error {
            Some(message) => Err(EngineError::Output(message.clone())),
            None => Ok(container.script.output.clone()),
        }
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let task = self.task_of(handle)?;
        let mut state = self.lock();
        state.calls.push(MockCall::Stop { task });

        if let Some(container) = state.containers.get_mut(handle) {
            if let Some(message) = &container.script.stop_error {
                return Err(EngineError::Stop(message.clone()));
            }
            container.stopped_at.get_or_insert_with(Instant::now);
        }
        state.retire(handle);
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let task = self.task_of(handle)?;
        self.lock().calls.push(MockCall::Remove { task });

        if self.script_of(handle)?.remove_hangs {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();

        let remove_error = state
            .containers
            .get(handle)
            .and_then(|container| container.script.remove_error.clone());
        if let Some(message) = remove_error {
            return Err(EngineError::Remove(message));
        }

        state.retire(handle);
        state.containers.remove(handle);
        Ok(())
    }

    fn engine_name(&self) -> &'static str {
        "mock"
    }
}
