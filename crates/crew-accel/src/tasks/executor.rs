//! Bounded worker pool for batches of independent tasks.
//!
//! [`TaskExecutor::execute_concurrent_tasks`] tags every descriptor with its
//! index, pushes the batch onto a shared queue and spawns at most
//! `min(workers, batch_len)` workers onto a [`JoinSet`]. Each worker pops the
//! next task, runs it through the [`TaskHandler`], and reports
//! `(index, outcome)` over a channel. The caller fills result slot `index`
//! as reports arrive, so results line up with the input however the workers
//! interleave.
//!
//! A failing or panicking task only affects its own slot. A per-task timeout
//! (from [`TaskExecutorConfig`]) turns a slow task into
//! [`TaskOutcome::TimedOut`]; a batch timeout releases the caller with
//! [`TaskError::BatchTimeout`] and aborts the workers best-effort.

use super::graph::TaskGraph;
use super::types::{EchoTaskHandler, TaskDescriptor, TaskHandler, TaskOutcome};
use crate::config::TaskExecutorConfig;
use crate::error::{ConfigError, TaskError};
use futures::FutureExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Cumulative counters across every batch an executor has run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskExecutionStats {
    pub batches: u64,
    pub batches_timed_out: u64,
    pub tasks_scheduled: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub total_execution_time_ms: u64,
}

type TaskQueue = Arc<Mutex<VecDeque<(usize, TaskDescriptor)>>>;

/// Result slots of one batch, indexed like its input.
struct BatchRun {
    slots: Vec<Option<TaskOutcome>>,
    deadline_hit: bool,
}

impl BatchRun {
    fn finished(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Fixed-size worker pool for batches of tasks.
///
/// ```ignore
/// let executor = TaskExecutor::new(TaskExecutorConfig::default())?;
/// let results = executor
///     .execute_concurrent_tasks(["task_0", "task_1", "task_2"], Some(Duration::from_secs(5)))
///     .await?;
/// assert_eq!(results.len(), 3);
/// ```
pub struct TaskExecutor {
    config: TaskExecutorConfig,
    handler: Arc<dyn TaskHandler>,
    stats: Mutex<TaskExecutionStats>,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    /// Executor running every task through [`EchoTaskHandler`].
    pub fn new(config: TaskExecutorConfig) -> Result<Self, ConfigError> {
        Self::with_handler(config, EchoTaskHandler)
    }

    pub fn with_handler(
        config: TaskExecutorConfig,
        handler: impl TaskHandler + 'static,
    ) -> Result<Self, ConfigError> {
        Self::with_shared_handler(config, Arc::new(handler))
    }

    pub fn with_shared_handler(
        config: TaskExecutorConfig,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            handler,
            stats: Mutex::new(TaskExecutionStats::default()),
        })
    }

    pub fn config(&self) -> &TaskExecutorConfig {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.config.workers
    }

    pub fn get_stats(&self) -> TaskExecutionStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a batch and return one outcome per task, in submission order.
    ///
    /// Fails only when `timeout` elapses before every task has reported.
    pub async fn execute_concurrent_tasks<I, T>(
        &self,
        tasks: I,
        timeout: Option<Duration>,
    ) -> Result<Vec<TaskOutcome>, TaskError>
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskDescriptor>,
    {
        let run = self
            .run_batch(tasks.into_iter().map(Into::into).collect(), timeout)
            .await;
        let total = run.slots.len();
        if run.deadline_hit {
            return Err(TaskError::BatchTimeout {
                after: timeout.unwrap_or_default(),
                completed: run.finished(),
                total,
            });
        }
        Ok(run.slots.into_iter().flatten().collect())
    }

    /// Drive one batch through the pool.
    ///
    /// Without a deadline hit every slot is filled. With one, only the slots
    /// of tasks that reported before the deadline are.
    async fn run_batch(&self, tasks: Vec<TaskDescriptor>, timeout: Option<Duration>) -> BatchRun {
        let total = tasks.len();
        let started = Instant::now();
        if total == 0 {
            self.record(0, &[], started, false);
            return BatchRun {
                slots: Vec::new(),
                deadline_hit: false,
            };
        }

        let worker_count = self.config.workers.min(total);
        info!("Executing {total} tasks on {worker_count} workers");

        let queue: TaskQueue = Arc::new(Mutex::new(tasks.into_iter().enumerate().collect()));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, TaskOutcome)>();
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(worker(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&self.handler),
                self.config.task_timeout,
                tx.clone(),
            ));
        }
        // Workers hold the only senders: the channel closes when they all exit.
        drop(tx);

        let mut slots: Vec<Option<TaskOutcome>> = vec![None; total];
        let mut completed = 0;
        // A deadline past the end of the clock is no deadline.
        let deadline = timeout.and_then(|t| started.checked_add(t));

        while completed < total {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        workers.abort_all();
                        warn!(
                            "Batch deadline of {:.1}s reached, abandoning {} of {total} tasks",
                            timeout.unwrap_or_default().as_secs_f64(),
                            total - completed,
                        );
                        let finished: Vec<TaskOutcome> = slots.iter().flatten().cloned().collect();
                        self.record(total, &finished, started, true);
                        return BatchRun {
                            slots,
                            deadline_hit: true,
                        };
                    }
                },
                None => rx.recv().await,
            };

            let Some((index, outcome)) = next else {
                // Every worker exited; any empty slot is filled below.
                break;
            };
            if let Some(slot) = slots.get_mut(index)
                && slot.is_none()
            {
                *slot = Some(outcome);
                completed += 1;
                debug!("Task {index} finished ({completed}/{total})");
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Task worker exited abnormally: {e}");
            }
        }

        for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
            *slot = Some(TaskOutcome::Failed("worker exited before the task ran".into()));
        }
        let outcomes: Vec<TaskOutcome> = slots.iter().flatten().cloned().collect();
        self.record(total, &outcomes, started, false);
        BatchRun {
            slots,
            deadline_hit: false,
        }
    }

    /// Run one task as a batch of one under `timeout`.
    pub async fn execute_task_with_timeout(
        &self,
        task: impl Into<TaskDescriptor>,
        timeout: Duration,
    ) -> Result<TaskOutcome, TaskError> {
        let mut outcomes = self
            .execute_concurrent_tasks([task.into()], Some(timeout))
            .await?;
        Ok(outcomes
            .pop()
            .unwrap_or_else(|| TaskOutcome::Failed("task produced no outcome".into())))
    }

    /// Run every queued task of `graph` wave by wave.
    ///
    /// Each wave is the graph's current ready set, executed as one batch.
    /// Tasks depending on a failed or timed-out task are marked failed
    /// without running. `timeout` bounds the whole graph. Returns the number
    /// of waves run.
    pub async fn execute_graph(
        &self,
        graph: &mut TaskGraph,
        timeout: Option<Duration>,
    ) -> Result<usize, TaskError> {
        // Rejects cycles and unknown dependencies before anything runs.
        graph.execution_order()?;

        let started = Instant::now();
        let mut waves = 0;
        loop {
            let ready = graph.ready_tasks();
            if ready.is_empty() {
                break;
            }
            waves += 1;
            info!("Graph wave {waves}: {} tasks", ready.len());

            let mut batch = Vec::with_capacity(ready.len());
            for id in &ready {
                graph.mark_started(id)?;
                let descriptor = graph
                    .descriptor(id)
                    .cloned()
                    .ok_or_else(|| TaskError::UnknownTask(id.clone()))?;
                batch.push(descriptor);
            }

            let remaining = timeout.map(|t| t.saturating_sub(started.elapsed()));
            let run = self.run_batch(batch, remaining).await;
            let after = timeout.unwrap_or_default();
            for (id, slot) in ready.iter().zip(run.slots) {
                match slot {
                    Some(TaskOutcome::Completed(out)) => graph.mark_completed(id, out)?,
                    Some(TaskOutcome::Failed(err)) => graph.mark_failed(id, err)?,
                    Some(TaskOutcome::TimedOut { after }) => graph.mark_timed_out(id, after)?,
                    // Still running when the graph deadline hit.
                    None => graph.mark_timed_out(id, after)?,
                }
            }

            if run.deadline_hit {
                graph.fail_blocked();
                return Err(TaskError::BatchTimeout {
                    after,
                    completed: graph.completed_count(),
                    total: graph.len(),
                });
            }

            let blocked = graph.fail_blocked();
            if !blocked.is_empty() {
                warn!(
                    "Skipping {} tasks whose dependencies failed: {}",
                    blocked.len(),
                    blocked.join(", ")
                );
            }
        }
        Ok(waves)
    }

    fn record(&self, scheduled: usize, outcomes: &[TaskOutcome], started: Instant, timed_out: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.batches += 1;
        stats.tasks_scheduled += scheduled as u64;
        if timed_out {
            stats.batches_timed_out += 1;
        }
        for outcome in outcomes {
            match outcome {
                TaskOutcome::Completed(_) => stats.tasks_completed += 1,
                TaskOutcome::Failed(_) => stats.tasks_failed += 1,
                TaskOutcome::TimedOut { .. } => stats.tasks_timed_out += 1,
            }
        }
        stats.total_execution_time_ms += started.elapsed().as_millis() as u64;
    }
}

/// Drain the shared queue until it is empty or the caller stops listening.
async fn worker(
    worker_id: usize,
    queue: TaskQueue,
    handler: Arc<dyn TaskHandler>,
    task_timeout: Option<Duration>,
    results: mpsc::UnboundedSender<(usize, TaskOutcome)>,
) {
    loop {
        let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let Some((index, task)) = next else {
            break;
        };
        trace!("Worker {worker_id} running task {index}: {task}");
        let outcome = run_task(handler.as_ref(), task, task_timeout).await;
        if results.send((index, outcome)).is_err() {
            break;
        }
    }
    trace!("Worker {worker_id} idle, exiting");
}

async fn run_task(
    handler: &dyn TaskHandler,
    task: TaskDescriptor,
    task_timeout: Option<Duration>,
) -> TaskOutcome {
    // `run` itself may panic, not only the future it returns.
    let body = AssertUnwindSafe(async move { handler.run(task).await }).catch_unwind();
    let result = match task_timeout {
        Some(limit) => match tokio::time::timeout(limit, body).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Task timed out after {:.1}s", limit.as_secs_f64());
                return TaskOutcome::TimedOut { after: limit };
            }
        },
        None => body.await,
    };
    match result {
        Ok(Ok(output)) => TaskOutcome::Completed(output),
        Ok(Err(error)) => TaskOutcome::Failed(error),
        Err(payload) => TaskOutcome::Failed(format!(
            "task panicked: {}",
            crate::panic_message(payload.as_ref())
        )),
    }
}
