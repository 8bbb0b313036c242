//! Task descriptors, outcomes, states and handlers.

use crate::tools::ToolExecutor;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// What a task body produces: output text, or why it failed.
pub type TaskResult = Result<String, String>;

// ── Descriptor ────────────────────────────────────────────────────

/// An opaque description of one unit of work: a string or structured JSON.
///
/// The executor never looks inside; the [`TaskHandler`] decides what it means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskDescriptor(Value);

impl TaskDescriptor {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl fmt::Display for TaskDescriptor {
    /// Strings render bare, everything else as compact JSON.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

impl From<&str> for TaskDescriptor {
    fn from(s: &str) -> Self {
        Self(Value::String(s.to_string()))
    }
}

impl From<String> for TaskDescriptor {
    fn from(s: String) -> Self {
        Self(Value::String(s))
    }
}

impl From<Value> for TaskDescriptor {
    fn from(v: Value) -> Self {
        Self(v)
    }
}

// ── State ─────────────────────────────────────────────────────────

/// Lifecycle of one task: `Queued -> Running -> {Completed, Failed, TimedOut}`.
///
/// A queued task may also go straight to `Failed` when it can no longer run
/// (a dependency failed). Nothing ever returns to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::TimedOut
        )
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Failed) | (Running, Completed | Failed | TimedOut)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

// ── Outcome ───────────────────────────────────────────────────────

/// Final result for one slot of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(String),
    /// The handler returned an error or panicked.
    Failed(String),
    /// The per-task timeout elapsed first.
    TimedOut { after: Duration },
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, TaskOutcome::TimedOut { .. })
    }

    /// Output text of a completed task.
    pub fn output(&self) -> Option<&str> {
        match self {
            TaskOutcome::Completed(out) => Some(out),
            _ => None,
        }
    }

    /// Terminal state this outcome corresponds to.
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Completed(_) => TaskState::Completed,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::TimedOut { .. } => TaskState::TimedOut,
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Completed(out) => f.write_str(out),
            TaskOutcome::Failed(err) => write!(f, "Error: {err}"),
            TaskOutcome::TimedOut { after } => {
                write!(f, "Error: timed out after {:.1}s", after.as_secs_f64())
            }
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────

/// Runs the body of a task.
///
/// Implementations must be shareable across the worker pool. Returning `Err`
/// marks only this task as failed; a panic is caught and treated the same.
pub trait TaskHandler: Send + Sync {
    fn run(&self, task: TaskDescriptor) -> BoxFuture<'_, TaskResult>;
}

/// Default handler: reports the descriptor back as `Completed task: ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTaskHandler;

impl TaskHandler for EchoTaskHandler {
    fn run(&self, task: TaskDescriptor) -> BoxFuture<'_, TaskResult> {
        Box::pin(async move { Ok(format!("Completed task: {task}")) })
    }
}

/// Type-erased async closure for [`FnTaskHandler`].
type ErasedTaskFn = Box<dyn Fn(TaskDescriptor) -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// A closure-based task handler.
///
/// ```ignore
/// let handler = FnTaskHandler::new(|task: TaskDescriptor| async move {
///     Ok(format!("processed {task}"))
/// });
/// ```
pub struct FnTaskHandler {
    handler: ErasedTaskFn,
}

impl FnTaskHandler {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(TaskDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            handler: Box::new(move |task| -> BoxFuture<'static, TaskResult> {
                Box::pin(handler(task))
            }),
        }
    }
}

impl TaskHandler for FnTaskHandler {
    fn run(&self, task: TaskDescriptor) -> BoxFuture<'_, TaskResult> {
        (self.handler)(task)
    }
}

impl fmt::Debug for FnTaskHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTaskHandler").finish_non_exhaustive()
    }
}

/// Routes each task through a shared [`ToolExecutor`].
///
/// Accepted descriptors:
/// - a bare string: the tool name, called with `{}`;
/// - `{"tool": "<name>", "arguments": <json>}`; `arguments` defaults to `{}`
///   and may be a JSON string.
#[derive(Debug, Clone)]
pub struct ToolTaskHandler {
    executor: Arc<ToolExecutor>,
    use_cache: bool,
    timeout: Option<Duration>,
}

impl ToolTaskHandler {
    pub fn new(executor: Arc<ToolExecutor>) -> Self {
        Self {
            executor,
            use_cache: true,
            timeout: None,
        }
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Per-call timeout passed to the executor. `None` uses its default.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }
}

/// Split a descriptor into `(tool_name, arguments)`.
fn tool_call_from(task: &TaskDescriptor) -> Result<(String, Value), String> {
    match task.as_value() {
        Value::String(name) => Ok((name.clone(), Value::Object(Default::default()))),
        Value::Object(map) => {
            let name = map
                .get("tool")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("task descriptor has no \"tool\" name: {task}"))?;
            let arguments = match map.get("arguments") {
                None | Some(Value::Null) => Value::Object(Default::default()),
                Some(Value::String(raw)) => serde_json::from_str(raw)
                    .map_err(|e| format!("task arguments are not valid JSON: {e}"))?,
                Some(other) => other.clone(),
            };
            Ok((name.to_string(), arguments))
        }
        other => Err(format!("unsupported task descriptor: {other}")),
    }
}

impl TaskHandler for ToolTaskHandler {
    fn run(&self, task: TaskDescriptor) -> BoxFuture<'_, TaskResult> {
        Box::pin(async move {
            let (name, arguments) = tool_call_from(&task)?;
            self.executor
                .execute_tool(&name, arguments, self.timeout, self.use_cache)
                .await
                .map_err(|e| e.to_string())
        })
    }
}
