//! Execution acceleration for multi-agent tool calling.
//!
//! `crew-accel` sits between an agent runtime and the tools it calls. It
//! provides two engines:
//!
//! - a **tool executor** that validates JSON arguments, caches results per
//!   `(tool, arguments)` pair for a configurable TTL, and caps how many
//!   invocations may be in flight at once, with per-call timeouts and
//!   running statistics;
//! - a **task executor** that runs batches of independent tasks on a bounded
//!   worker pool, returns results in submission order, and isolates each
//!   task's failure to its own slot.
//!
//! # Getting started
//!
//! ```ignore
//! use crew_accel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tools = ToolSet::new().with(FnTool::new(
//!         ToolDef::new("add", "Add two integers.", json_schema_for::<AddArgs>()),
//!         |args: AddArgs| async move { Ok((args.a + args.b).to_string()) },
//!     ));
//!     let executor = ToolExecutor::new(ToolExecutorConfig::from_env()?, tools)?;
//!
//!     let sum = executor.execute_tool("add", r#"{"a": 2, "b": 3}"#, None, true).await?;
//!     assert_eq!(sum, "5");
//!     println!("{}", serde_json::to_string_pretty(&executor.get_stats())?);
//!
//!     let tasks = TaskExecutor::new(TaskExecutorConfig::from_env()?)?;
//!     let results = tasks
//!         .execute_concurrent_tasks(["task_0", "task_1"], Some(Duration::from_secs(5)))
//!         .await?;
//!     assert_eq!(results.len(), 2);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Define tools:** see the [`Tool`](tools::core::Tool) trait,
//!   [`ToolSet`](tools::core::ToolSet) for registration and schema checks,
//!   and [`FnTool`](tools::core::FnTool) for closure-based tools.
//!
//! - **Invoke tools:** see
//!   [`ToolExecutor::execute_tool`](tools::executor::ToolExecutor::execute_tool).
//!   Failures come back as [`ToolError`](error::ToolError); only
//!   [`RecursionLimitExceeded`](error::ToolError::RecursionLimitExceeded) is
//!   worth retrying.
//!
//! - **Tune caching:** see [`ToolExecutorConfig`](config::ToolExecutorConfig)
//!   for the TTL and capacity, and [`tools::backend`] for the native and
//!   fallback cache backends.
//!
//! - **Run tasks in parallel:** see
//!   [`TaskExecutor`](tasks::executor::TaskExecutor). Plug in your own work
//!   with [`TaskHandler`](tasks::types::TaskHandler), or route tasks to tools
//!   with [`ToolTaskHandler`](tasks::types::ToolTaskHandler).
//!
//! - **Run tasks with dependencies:** see [`TaskGraph`](tasks::graph::TaskGraph)
//!   and [`TaskExecutor::execute_graph`](tasks::executor::TaskExecutor::execute_graph).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, [`ToolSet`](tools::core::ToolSet), result cache, recursion guard, [`ToolExecutor`](tools::executor::ToolExecutor) |
//! | [`tasks`] | [`TaskExecutor`](tasks::executor::TaskExecutor) worker pool, [`TaskGraph`](tasks::graph::TaskGraph), task handlers |
//! | [`config`] | Executor configuration, defaults and `CREW_ACCEL_*` environment overrides |
//! | [`error`] | [`ToolError`](error::ToolError), [`TaskError`](error::TaskError), [`ConfigError`](error::ConfigError) |
//! | [`logging`] | One-line `tracing` layer used by the CLI |

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod tasks;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::any::Any;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. Tool definitions carry this as their parameter
/// schema, and the executor validates arguments against it.
///
/// # Example
///
/// ```
/// use crew_accel::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     query: String,
///     #[serde(default)]
///     limit: Option<u32>,
/// }
///
/// let schema = json_schema_for::<SearchArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"query".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Tool definitions ───────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition in the OpenAI function-calling format.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_def_serializes_in_function_format() {
        let def = ToolDef::new("search", "Search things.", serde_json::json!({"type": "object"}));
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "search");
        assert_eq!(value["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(s.as_ref()), "unknown panic payload");
    }
}
