//! Concurrent task execution.
//!
//! - [`types`]: [`TaskDescriptor`], [`TaskOutcome`], [`TaskState`] and the
//!   [`TaskHandler`] trait with its stock implementations.
//! - [`executor`]: [`TaskExecutor`], the bounded worker pool.
//! - [`graph`]: [`TaskGraph`], dependency ordering for tasks that are not
//!   independent.

pub mod executor;
pub mod graph;
pub mod types;

pub use executor::{TaskExecutionStats, TaskExecutor};
pub use graph::TaskGraph;
pub use types::{
    EchoTaskHandler, FnTaskHandler, TaskDescriptor, TaskHandler, TaskOutcome, TaskResult,
    TaskState, ToolTaskHandler,
};
