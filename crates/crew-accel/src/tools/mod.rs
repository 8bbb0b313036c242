//! The tool execution engine and its parts.
//!
//! Every invocation goes through [`ToolExecutor::execute_tool`], which wraps
//! a [`Tool`] body in argument validation, a TTL result cache and an
//! in-flight ceiling.
//!
//! # Defining tools
//!
//! - **[`FnTool`]**: closure-based, auto-parses arguments. Best for simple tools.
//! - **`impl Tool`**: full struct with [`Tool::definition()`] and
//!   [`Tool::execute()`]. Best for tools that own state.
//! - **[`SimulatedTool`]**: echoes the invocation. Set it as a
//!   [`ToolSet`] fallback to accept any tool name.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait, [`ToolSet`], [`FnTool`], [`SimulatedTool`].
//! - [`args`]: [`ToolArguments`] and the canonical JSON encoding used for
//!   cache keys.
//! - [`cache`]: [`ResultCache`], lazily expiring `(tool, args)` results.
//! - [`guard`]: [`RecursionGuard`] and its RAII [`DepthPermit`].
//! - [`backend`]: the native and fallback cache backends.
//! - [`executor`]: [`ToolExecutor`] and [`ExecutionStats`].

pub mod args;
pub mod backend;
pub mod cache;
pub mod core;
pub mod executor;
pub mod guard;

pub use args::{ToolArguments, canonical_json};
pub use backend::{
    BackendError, ExecutionBackend, FallbackBackend, NativeBackend, ToolExecutorBackend,
};
pub use cache::ResultCache;
pub use core::{
    FnTool, SimulatedTool, Tool, ToolFuture, ToolResult, ToolSet, log_tool_call, parse_tool_args,
};
pub use executor::{ExecutionStats, ToolExecutor};
pub use guard::{DepthLimitReached, DepthPermit, RecursionGuard};
