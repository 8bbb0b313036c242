//! Tool abstraction for the execution engine.
//!
//! The [`Tool`] trait is the outbound seam of the engine: a static definition
//! (name, description, JSON Schema) and an async `execute` method producing
//! either a result string or a failure message. Tools are collected into a
//! [`ToolSet`], which resolves names to bodies and holds each tool's compiled
//! parameter schema. Caching, recursion limits and timeouts live in
//! [`ToolExecutor`](super::executor::ToolExecutor), not here.

use crate::ToolDef;
use crate::error::ValidationError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, trace};

/// What a tool body produces: the result string, or why it failed.
pub type ToolResult = Result<String, String>;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = ToolResult> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A named unit of work the executor can invoke.
///
/// `execute` receives the canonical JSON encoding of the call's arguments.
/// Return `Err` to report a failure; the executor wraps it in
/// [`ToolError::Execution`](crate::error::ToolError::Execution) and never
/// caches it.
///
/// # Example
///
/// ```ignore
/// struct Lookup { table: Arc<HashMap<String, String>> }
///
/// impl Tool for Lookup {
///     fn definition(&self) -> ToolDef { /* ... */ }
///
///     fn execute(&self, arguments: &str) -> ToolFuture<'_> {
///         let arguments = arguments.to_string();
///         Box::pin(async move {
///             let args: LookupArgs = parse_tool_args(&arguments)?;
///             self.table.get(&args.key).cloned().ok_or_else(|| "no such key".into())
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDef;

    /// Run the tool with canonical JSON arguments.
    fn execute(&self, arguments: &str) -> ToolFuture<'_>;

    /// Run the tool when dispatched under `name`.
    ///
    /// Registered tools are only ever dispatched under their own name, so the
    /// default ignores it. A [`ToolSet`]'s fallback tool sees every unknown
    /// name here and may use it.
    fn execute_as(&self, name: &str, arguments: &str) -> ToolFuture<'_> {
        let _ = name;
        self.execute(arguments)
    }

    /// The tool's name (delegates to definition).
    fn name(&self) -> String {
        self.definition().function.name.clone()
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools resolved by name.
///
/// Unknown names go to the fallback tool when one is set, otherwise they
/// fail with "unknown tool".
///
/// # Example
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with(Lookup::new(table))
///     .with(FnTool::new(def, |args: SumArgs| async move { Ok((args.a + args.b).to_string()) }))
///     .with_fallback(SimulatedTool);
/// ```
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
    /// Compiled parameter schemas, keyed by tool name. Tools whose schema
    /// does not compile are absent and skip validation.
    schemas: HashMap<String, jsonschema::Validator>,
    fallback: Option<Box<dyn Tool>>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.as_ref().map(|t| t.name()))
            .finish()
    }
}

impl ToolSet {
    /// Create an empty tool set without a fallback.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            schemas: HashMap::new(),
            fallback: None,
        }
    }

    /// An empty set whose fallback is [`SimulatedTool`]: every name resolves
    /// and echoes its arguments.
    pub fn simulated() -> Self {
        Self::new().with_fallback(SimulatedTool)
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let def = tool.definition();
        let name = def.function.name.clone();
        match jsonschema::validator_for(&def.function.parameters) {
            Ok(validator) => {
                self.schemas.insert(name.clone(), validator);
            }
            Err(e) => {
                debug!("Tool {name} has an unusable parameter schema, skipping validation: {e}");
                self.schemas.remove(&name);
            }
        }
        self.tools.insert(name, Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Tool used for names that are not registered.
    pub fn with_fallback(mut self, tool: impl Tool + 'static) -> Self {
        self.fallback = Some(Box::new(tool));
        self
    }

    /// Definitions of the registered tools (the fallback is not listed).
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// The tool that would run for `name`, if any.
    pub fn resolve(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .get(name)
            .or(self.fallback.as_ref())
            .map(|t| t.as_ref())
    }

    /// Check `arguments` against the registered tool's parameter schema.
    ///
    /// Unregistered names (handled by the fallback) and tools without a
    /// usable schema always pass.
    pub fn validate_arguments(&self, name: &str, arguments: &Value) -> Result<(), ValidationError> {
        let Some(validator) = self.schemas.get(name) else {
            return Ok(());
        };
        let errors: Vec<String> = validator
            .iter_errors(arguments)
            .map(|e| format!("  - {}: {e}", e.instance_path()))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(format!(
                "argument validation failed for tool '{name}':\n{}",
                errors.join("\n")
            )))
        }
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

// ── SimulatedTool ──────────────────────────────────────────────────

/// Stand-in body that reports what it was asked to do.
///
/// Returns `"Executed {name} with args: {arguments}"`. Useful as a
/// [`ToolSet`] fallback when wiring the engine up before real tools exist,
/// and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedTool;

impl Tool for SimulatedTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "simulated",
            "Reports the invocation instead of performing it",
            serde_json::json!({}),
        )
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        self.execute_as("simulated", arguments)
    }

    fn execute_as(&self, name: &str, arguments: &str) -> ToolFuture<'_> {
        let result = format!("Executed {name} with args: {arguments}");
        Box::pin(async move { Ok(result) })
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler =
    Box<dyn Fn(String) -> Pin<Box<dyn Future<Output = ToolResult> + Send>> + Send + Sync>;

/// A closure-based tool that auto-parses arguments and delegates to a handler.
///
/// Use it for stateless tools. Tools that own state should implement
/// [`Tool`] on a struct.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct SumArgs { a: i64, b: i64 }
///
/// let tool = FnTool::new(
///     ToolDef::new("sum", "Add two integers", json_schema_for::<SumArgs>()),
///     |args: SumArgs| async move { Ok((args.a + args.b).to_string()) },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
}

impl FnTool {
    /// Create a closure-based tool.
    ///
    /// The handler receives arguments deserialized into `A`. A deserialization
    /// failure becomes the tool's `Err` without calling the handler.
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let erased = move |raw: String| -> Pin<Box<dyn Future<Output = ToolResult> + Send>> {
            match parse_tool_args::<A>(&raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move { Err(e) }),
            }
        };

        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        (self.handler)(arguments.to_string())
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.function.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", arguments.len());
    trace!("[tool] {name} arguments: {arguments}");
}

/// Parse JSON arguments into a typed struct, formatting the error as a
/// tool failure message.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments).map_err(|e| format!("invalid tool arguments: {e}"))
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    struct EchoTool;

    impl Tool for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new(
                "echo",
                "Echo the input",
                serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            )
        }

        fn execute(&self, arguments: &str) -> ToolFuture<'_> {
            let args: Value = serde_json::from_str(arguments).unwrap_or_default();
            let result = args
                .get("text")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| "no text".to_string());
            Box::pin(async move { result })
        }
    }

    #[test]
    fn tool_name_from_definition() {
        assert_eq!(EchoTool.name(), "echo");
    }

    #[test]
    fn toolset_register_and_definitions() {
        let set = ToolSet::new().with(EchoTool);
        assert_eq!(set.len(), 1);
        assert!(set.contains("echo"));
        assert!(!set.contains("simulated"));
        assert_eq!(set.definitions()[0].function.name, "echo");
    }

    #[tokio::test]
    async fn resolve_known_tool() {
        let set = ToolSet::new().with(EchoTool);
        let tool = set.resolve("echo").unwrap();
        assert_eq!(tool.execute(r#"{"text":"hello"}"#).await, Ok("hello".into()));
    }

    #[test]
    fn unknown_tool_without_fallback() {
        let set = ToolSet::new().with(EchoTool);
        assert!(set.resolve("nonexistent").is_none());
    }

    #[tokio::test]
    async fn unknown_tool_uses_fallback() {
        let set = ToolSet::simulated();
        assert!(set.has_fallback());
        let tool = set.resolve("calc").unwrap();
        let out = tool.execute_as("calc", r#"{"a":1}"#).await.unwrap();
        assert_eq!(out, r#"Executed calc with args: {"a":1}"#);
    }

    #[test]
    fn schema_validation_reports_path() {
        let set = ToolSet::new().with(EchoTool);
        assert!(
            set.validate_arguments("echo", &serde_json::json!({"text": "hi"}))
                .is_ok()
        );

        let err = set
            .validate_arguments("echo", &serde_json::json!({"text": 5}))
            .unwrap_err();
        assert!(err.message.contains("echo"));
        assert!(err.message.contains("/text"));

        assert!(set.validate_arguments("echo", &serde_json::json!({})).is_err());
    }

    #[test]
    fn schema_validation_skipped_for_unregistered() {
        let set = ToolSet::simulated();
        assert!(set.validate_arguments("anything", &serde_json::json!(42)).is_ok());
    }

    #[derive(Debug, Deserialize)]
    struct SumArgs {
        a: i64,
        b: i64,
    }

    fn sum_tool() -> FnTool {
        FnTool::new(
            ToolDef::new("sum", "Add", serde_json::json!({"type": "object"})),
            |args: SumArgs| async move { Ok((args.a + args.b).to_string()) },
        )
    }

    #[tokio::test]
    async fn fn_tool_parses_arguments() {
        let tool = sum_tool();
        assert_eq!(tool.execute(r#"{"a":2,"b":3}"#).await, Ok("5".into()));
    }

    #[tokio::test]
    async fn fn_tool_reports_parse_errors() {
        let tool = sum_tool();
        let err = tool.execute(r#"{"a":"x"}"#).await.unwrap_err();
        assert!(err.starts_with("invalid tool arguments"));
    }

    #[test]
    fn parse_tool_args_error_message() {
        let err = parse_tool_args::<SumArgs>("[]").unwrap_err();
        assert!(err.contains("invalid tool arguments"));
    }
}
