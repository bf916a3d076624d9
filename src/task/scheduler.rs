//! Bounded-concurrency batch scheduler.
//!
//! A single controller loop owns every scheduling decision: admission into the
//! running slots, polling, global-timeout evaluation and cleanup. Engine calls
//! run on spawned tokio tasks that only report [`Transition`]s back, so one slow
//! container never holds up the others and the controller applies exactly one
//! state change at a time.

use crate::env;
use crate::task::engine::{ContainerEngine, ContainerHandle, EngineError, LaunchSpec};
use crate::task::types::*;
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Scheduler configuration
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Upper bound on containers in Starting or Running state
    pub max_running_tasks: usize,
    pub poll_interval: Duration,
    /// Deadline for the whole batch, measured from the first admission.
    /// `None` disables the deadline.
    pub global_timeout: Option<Duration>,
    /// Stop containers still running when the deadline passes
    pub kill_on_timeout: bool,
    /// Remove containers of failed tasks (passed ones are always removed)
    pub delete_failed: bool,
    /// Bound on every stop and remove call and on waiting for late starts
    /// after the deadline
    pub stop_grace: Duration,
    /// Prepended to task names to build container names
    pub name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_running_tasks: env::defaults::MAX_RUNNING_TASKS,
            poll_interval: Duration::from_secs(env::defaults::POLL_INTERVAL_SECS),
            global_timeout: None,
            kill_on_timeout: false,
            delete_failed: true,
            stop_grace: Duration::from_secs(env::defaults::STOP_GRACE_SECS),
            name_prefix: Self::timestamp_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// Local run timestamp such as `1019_164903`
    pub fn timestamp_prefix() -> String {
        chrono::Local::now()
            .format(env::defaults::NAME_PREFIX_FORMAT)
            .to_string()
    }

    /// Reject settings `run` cannot honour
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_running_tasks == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_running_tasks must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.global_timeout.is_some_and(|t| t.is_zero()) {
            return Err(SchedulerError::InvalidConfig(
                "global_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Precondition failures of [`Scheduler::run`]
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

/// State change reported by an engine worker
#[derive(Debug)]
enum Transition {
    Started {
        index: usize,
        handle: ContainerHandle,
    },
    StillRunning {
        index: usize,
    },
    Exited {
        index: usize,
        exit_code: Option<i64>,
        output: String,
    },
    Failed {
        index: usize,
        error: EngineError,
    },
}

/// Controller-owned state of one batch
struct Batch {
    tasks: Vec<RunningTask>,
    verdicts: Vec<Option<Verdict>>,
    queue: VecDeque<usize>,
    /// Tasks with an inspect call in flight
    probing: HashSet<usize>,
    /// Tasks in Starting or Running state
    active: usize,
    first_admitted: Option<Instant>,
}

impl Batch {
    fn new(descriptors: Vec<TaskDescriptor>) -> Self {
        let tasks: Vec<RunningTask> = descriptors.into_iter().map(RunningTask::new).collect();
        Self {
            verdicts: vec![None; tasks.len()],
            queue: (0..tasks.len()).collect(),
            probing: HashSet::new(),
            active: 0,
            first_admitted: None,
            tasks,
        }
    }

    fn is_finished(&self) -> bool {
        self.verdicts.iter().all(Option::is_some)
    }

    /// Move a task into a terminal state with its verdict
    fn settle(&mut self, index: usize, state: TaskState, verdict: Verdict) {
        let task = &mut self.tasks[index];
        if task.state.occupies_slot() {
            self.active -= 1;
        }
        task.state = state;

        if verdict.passed {
            info!("Task {} passed: {}", verdict.task_name, verdict.reason);
        } else {
            info!("Task {} failed: {}", verdict.task_name, verdict.reason);
        }
        self.verdicts[index] = Some(verdict);
    }
}

/// Runs batches of [`TaskDescriptor`]s against a [`ContainerEngine`]
pub struct Scheduler {
    engine: Arc<dyn ContainerEngine>,
    config: SchedulerConfig,
    run_id: Uuid,
}

impl Scheduler {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Identifier attached to every container of this scheduler
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Container name used for a task
    pub fn container_name(&self, task_name: &str) -> String {
        if self.config.name_prefix.is_empty() {
            task_name.to_string()
        } else {
            format!("{}_{}", self.config.name_prefix, task_name)
        }
    }

    /// Run every task to a terminal state and return one verdict per task,
    /// in input order.
    ///
    /// Only invalid configuration is an error; engine failures, assertion
    /// failures and the timeout all end up in the returned verdicts.
    pub async fn run(&self, tasks: Vec<TaskDescriptor>) -> Result<Vec<Verdict>, SchedulerError> {
        self.config.validate()?;

        if tasks.is_empty() {
            debug!("No tasks to run");
            return Ok(Vec::new());
        }

        info!(
            "Running {} tasks on {} with at most {} at a time (run {})",
            tasks.len(),
            self.engine.engine_name(),
            self.config.max_running_tasks,
            self.run_id
        );

        let mut batch = Batch::new(tasks);
        let mut workers: JoinSet<Transition> = JoinSet::new();
        let mut cleanup: JoinSet<()> = JoinSet::new();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut deadline: Option<Instant> = None;
        let mut timed_out = false;

        loop {
            self.admit(&mut batch, &mut workers);

            if deadline.is_none() {
                deadline = self
                    .config
                    .global_timeout
                    .zip(batch.first_admitted)
                    .map(|(timeout, first)| first + timeout);
            }

            if batch.is_finished() {
                break;
            }

            let expiry = deadline.filter(|_| !timed_out);

            tokio::select! {
                biased;

                _ = wait_until(expiry) => {
                    timed_out = true;
                    self.expire(&mut batch, &mut cleanup);
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => match joined {
                    Ok(transition) => self.apply(&mut batch, transition, &mut cleanup),
                    Err(e) => error!("Engine worker aborted: {}", e),
                },
                _ = ticker.tick() => self.poll(&mut batch, &mut workers),
            }
        }

        if timed_out && !workers.is_empty() {
            self.reap_late_starts(&mut batch, &mut workers, &mut cleanup)
                .await;
        }
        // Anything still in flight belongs to containers left running on purpose.
        workers.detach_all();

        while let Some(joined) = cleanup.join_next().await {
            if let Err(e) = joined {
                warn!("Cleanup worker aborted: {}", e);
            }
        }

        let verdicts: Vec<Verdict> = batch.verdicts.into_iter().flatten().collect();
        let passed = verdicts.iter().filter(|v| v.passed).count();
        info!(
            "Batch finished: {} passed, {} failed",
            passed,
            verdicts.len() - passed
        );

        Ok(verdicts)
    }

    /// Fill free running slots from the queue, in input order
    fn admit(&self, batch: &mut Batch, workers: &mut JoinSet<Transition>) {
        while batch.active < self.config.max_running_tasks {
            let Some(index) = batch.queue.pop_front() else {
                break;
            };

            let now = Instant::now();
            batch.first_admitted.get_or_insert(now);
            batch.active += 1;

            let task = &mut batch.tasks[index];
            task.state = TaskState::Starting;
            task.started_at = Some(now);

            let name = self.container_name(&task.descriptor.name);
            debug!(
                "Creating image:{} entrypoint:{:?} command:{:?} env:{:?}",
                task.descriptor.image,
                task.descriptor.entrypoint,
                task.descriptor.command,
                task.descriptor.environment
            );
            let spec = LaunchSpec::for_task(&task.descriptor, name, self.labels(&task.descriptor.name));

            let engine = Arc::clone(&self.engine);
            workers.spawn(guarded(index, launch(engine, index, spec)));
        }
    }

    /// Start an inspect call for every running task without one in flight
    fn poll(&self, batch: &mut Batch, workers: &mut JoinSet<Transition>) {
        for (index, task) in batch.tasks.iter().enumerate() {
            if task.state != TaskState::Running || batch.probing.contains(&index) {
                continue;
            }
            let Some(handle) = task.handle.clone() else {
                continue;
            };

            batch.probing.insert(index);
            let engine = Arc::clone(&self.engine);
            workers.spawn(guarded(index, probe(engine, index, handle)));
        }
    }

    fn apply(&self, batch: &mut Batch, transition: Transition, cleanup: &mut JoinSet<()>) {
        match transition {
            Transition::Started { index, handle } => {
                let task = &mut batch.tasks[index];
                task.handle = Some(handle.clone());
                if let Some(verdict) = batch.verdicts[index].as_mut() {
                    verdict.container.get_or_insert_with(|| handle.to_string());
                }

                match task.state {
                    TaskState::Starting => {
                        task.state = TaskState::Running;
                        info!(
                            "Started container {} for task {}",
                            handle.short(),
                            task.descriptor.name
                        );
                    }
                    TaskState::TimedOut if self.config.kill_on_timeout => {
                        info!(
                            "Container {} for task {} came up after the deadline, stopping it",
                            handle.short(),
                            task.descriptor.name
                        );
                        self.schedule_cleanup(cleanup, handle, false, true);
                    }
                    state => warn!(
                        "Container {} for task {} came up in state {:?}, leaving it running",
                        handle.short(),
                        task.descriptor.name,
                        state
                    ),
                }
            }
            Transition::StillRunning { index } => {
                batch.probing.remove(&index);
            }
            Transition::Exited {
                index,
                exit_code,
                output,
            } => {
                batch.probing.remove(&index);
                let task = &batch.tasks[index];
                if task.state != TaskState::Running {
                    debug!(
                        "Ignoring exit of task {} in state {:?}",
                        task.descriptor.name, task.state
                    );
                    return;
                }

                info!(
                    "Container for task {} exited with {:?}",
                    task.descriptor.name, exit_code
                );
                let verdict = Verdict::completed(task, exit_code, output);
                let passed = verdict.passed;
                let handle = task.handle.clone();
                batch.settle(index, TaskState::Completed, verdict);

                if let Some(handle) = handle {
                    self.schedule_cleanup(cleanup, handle, passed, false);
                }
            }
            Transition::Failed { index, error } => {
                batch.probing.remove(&index);
                let task = &batch.tasks[index];
                if task.state.is_terminal() {
                    debug!(
                        "Ignoring engine error for finished task {}: {}",
                        task.descriptor.name, error
                    );
                    return;
                }

                error!("Task {} hit an engine error: {}", task.descriptor.name, error);
                let verdict = Verdict::engine_error(task, &error);
                let handle = task.handle.clone();
                batch.settle(index, TaskState::EngineError, verdict);

                if let Some(handle) = handle {
                    self.schedule_cleanup(cleanup, handle, false, false);
                }
            }
        }
    }

    /// Judge every outstanding task as timed out; fires once per batch
    fn expire(&self, batch: &mut Batch, cleanup: &mut JoinSet<()>) {
        let outstanding: Vec<usize> = (0..batch.tasks.len())
            .filter(|&index| !batch.tasks[index].state.is_terminal())
            .collect();

        let names = outstanding
            .iter()
            .map(|&index| batch.tasks[index].descriptor.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        warn!(
            "Timeout triggered while waiting for containers: {}",
            names
        );

        batch.queue.clear();

        for index in outstanding {
            let task = &batch.tasks[index];
            let was_running = task.state == TaskState::Running;
            let handle = task.handle.clone();
            let verdict = Verdict::timed_out(task);
            batch.settle(index, TaskState::TimedOut, verdict);
            batch.probing.remove(&index);

            match handle {
                Some(handle) if was_running && self.config.kill_on_timeout => {
                    info!("Stopping container {}", handle.short());
                    self.schedule_cleanup(cleanup, handle, false, true);
                }
                Some(handle) if was_running => {
                    warn!("Leaving container {} running", handle.short());
                }
                _ => {}
            }
        }
    }

    /// Wait, at most `stop_grace`, for create calls still in flight at the
    /// deadline so that containers which come up late are recorded in their
    /// verdicts, and stopped when `kill_on_timeout` is set
    async fn reap_late_starts(
        &self,
        batch: &mut Batch,
        workers: &mut JoinSet<Transition>,
        cleanup: &mut JoinSet<()>,
    ) {
        let grace = self.config.stop_grace;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = workers.join_next().await {
                if let Ok(transition) = joined {
                    self.apply(batch, transition, cleanup);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Gave up waiting for {} engine calls after {:?}",
                workers.len(),
                grace
            );
        }
    }

    /// Best-effort stop and/or removal of a finished task's container.
    ///
    /// Passed tasks are always removed, failed ones only with `delete_failed`.
    fn schedule_cleanup(
        &self,
        cleanup: &mut JoinSet<()>,
        handle: ContainerHandle,
        passed: bool,
        stop_first: bool,
    ) {
        let remove = passed || self.config.delete_failed;
        if !stop_first && !remove {
            info!("Keeping container {} for inspection", handle.short());
            return;
        }

        let engine = Arc::clone(&self.engine);
        let grace = self.config.stop_grace;
        cleanup.spawn(async move {
            if stop_first {
                match tokio::time::timeout(grace, engine.stop(&handle)).await {
                    Ok(Ok(())) => info!("Stopped container {}", handle.short()),
                    Ok(Err(e)) => warn!("Failed to stop container {}: {}", handle.short(), e),
                    Err(_) => warn!(
                        "Stopping container {} did not finish within {:?}",
                        handle.short(),
                        grace
                    ),
                }
            }

            if remove {
                match tokio::time::timeout(grace, engine.remove(&handle)).await {
                    Ok(Ok(())) => info!("Removed container {}", handle.short()),
                    Ok(Err(e)) => warn!("Failed to remove container {}: {}", handle.short(), e),
                    Err(_) => warn!(
                        "Removing container {} did not finish within {:?}",
                        handle.short(),
                        grace
                    ),
                }
            }
        });
    }

    fn labels(&self, task_name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (env::labels::TASK.to_string(), task_name.to_string()),
            (env::labels::RUN.to_string(), self.run_id.to_string()),
        ])
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn launch(engine: Arc<dyn ContainerEngine>, index: usize, spec: LaunchSpec) -> Transition {
    match engine.create_and_start(&spec).await {
        Ok(handle) => Transition::Started { index, handle },
        Err(error) => Transition::Failed { index, error },
    }
}

/// Inspect a container and, once it has exited, capture its output
async fn probe(
    engine: Arc<dyn ContainerEngine>,
    index: usize,
    handle: ContainerHandle,
) -> Transition {
    let status = match engine.inspect(&handle).await {
        Ok(status) => status,
        Err(error) => return Transition::Failed { index, error },
    };

    if status.running {
        return Transition::StillRunning { index };
    }

    match engine.fetch_output(&handle).await {
        Ok(output) => Transition::Exited {
            index,
            exit_code: status.exit_code,
            output,
        },
        Err(error) => Transition::Failed { index, error },
    }
}

/// Turn a panicking engine call into an engine error for its task
fn guarded<F>(index: usize, work: F) -> impl Future<Output = Transition> + Send + 'static
where
    F: Future<Output = Transition> + Send + 'static,
{
    AssertUnwindSafe(work).catch_unwind().map(move |result| {
        result.unwrap_or_else(|panic| Transition::Failed {
            index,
            error: EngineError::Panicked(panic_message(panic.as_ref())),
        })
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
