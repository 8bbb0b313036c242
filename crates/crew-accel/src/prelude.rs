//! Convenience re-exports for common `crew-accel` types.
//!
//! ```ignore
//! use crew_accel::prelude::*;
//! ```
//!
//! Covers the executors, their configs and errors, and what is needed to
//! define tools and task handlers. Backend and cache internals are left
//! out; import those from [`tools`](crate::tools) directly.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ToolDef, json_schema_for};
pub use std::time::Duration;

// ── Configuration and errors ────────────────────────────────────────
pub use crate::config::{BackendPreference, TaskExecutorConfig, ToolExecutorConfig};
pub use crate::error::{ConfigError, TaskError, ToolError, ValidationError};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    ExecutionStats, FnTool, SimulatedTool, Tool, ToolArguments, ToolExecutor, ToolFuture,
    ToolSet, parse_tool_args,
};

// ── Tasks ───────────────────────────────────────────────────────────
pub use crate::tasks::{
    EchoTaskHandler, FnTaskHandler, TaskDescriptor, TaskExecutionStats, TaskExecutor, TaskGraph,
    TaskHandler, TaskOutcome, TaskState, ToolTaskHandler,
};
