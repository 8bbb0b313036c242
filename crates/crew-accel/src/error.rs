//! Error types for the tool and task engines.
//!
//! Each failure class is its own variant so the integration layer can
//! branch on it: bad input ([`ValidationError`]), an overloaded executor
//! ([`ToolError::RecursionLimitExceeded`]), a broken tool body
//! ([`ToolError::Execution`]), or a caller that gave up waiting
//! ([`ToolError::Timeout`], [`TaskError::BatchTimeout`]).

use crate::tasks::TaskState;
use std::time::Duration;
use thiserror::Error;

/// Arguments could not be turned into JSON, or failed the tool's schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid arguments: {message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors returned by [`ToolExecutor::execute_tool`](crate::tools::ToolExecutor::execute_tool).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Malformed arguments. Never retried.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The executor already has `max_depth` invocations in flight.
    #[error("maximum recursion depth ({max_depth}) exceeded for tool '{tool}'")]
    RecursionLimitExceeded { tool: String, max_depth: usize },

    /// The tool body itself failed.
    #[error("tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },

    /// The tool body did not finish within its timeout.
    #[error("tool '{tool}' timed out after {:.1}s", after.as_secs_f64())]
    Timeout { tool: String, after: Duration },
}

impl ToolError {
    /// Whether retrying the same call later can succeed.
    ///
    /// Only the recursion ceiling is transient: it clears as soon as another
    /// in-flight call returns.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::RecursionLimitExceeded { .. })
    }

    /// Name of the tool the error is tagged with, if any.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            ToolError::Validation(_) => None,
            ToolError::RecursionLimitExceeded { tool, .. }
            | ToolError::Execution { tool, .. }
            | ToolError::Timeout { tool, .. } => Some(tool),
        }
    }
}

/// Errors from the task executor and task graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The whole batch missed its deadline.
    #[error("batch timed out after {:.1}s ({completed} of {total} tasks finished)", after.as_secs_f64())]
    BatchTimeout {
        after: Duration,
        completed: usize,
        total: usize,
    },

    /// The registered dependencies contain a cycle.
    #[error("circular dependency detected: {unordered} of {total} tasks could not be ordered")]
    DependencyCycle { unordered: usize, total: usize },

    /// A task id that was never registered.
    #[error("task '{0}' not found")]
    UnknownTask(String),

    /// A task was moved to a state its current state cannot reach.
    #[error("task '{task}' cannot move from {from} to {to}")]
    InvalidTransition {
        task: String,
        from: TaskState,
        to: TaskState,
    },
}

/// A configuration value was rejected at construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
