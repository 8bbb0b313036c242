//! The tool execution engine.
//!
//! [`ToolExecutor`] is the single entry point for invoking a named tool. Each
//! call goes through the same pipeline:
//!
//! 1. canonicalize the arguments (and check them against the tool's schema);
//! 2. probe the result cache when asked to;
//! 3. take a slot from the [`RecursionGuard`];
//! 4. run the tool body under a timeout;
//! 5. release the slot, cache the result, count the execution.
//!
//! The executor is `Send + Sync` and is meant to be shared behind an `Arc`
//! by every worker that needs it.

use super::args::ToolArguments;
use super::backend::{BackendError, ExecutionBackend, ToolExecutorBackend};
use super::core::{ToolSet, log_tool_call};
use super::guard::RecursionGuard;
use crate::config::{BackendPreference, ToolExecutorConfig};
use crate::error::{ConfigError, ToolError, ValidationError};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Point-in-time view of an executor's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    /// Tool bodies that ran to a successful result.
    pub total_executions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub validation_failures: u64,
    /// `hits * 100 / (hits + misses)`, absent before the first lookup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit_rate_percent: Option<u64>,
    pub cache_entries: usize,
    pub backend: &'static str,
    pub in_flight: usize,
    pub max_recursion_depth: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    total_executions: u64,
    cache_hits: u64,
    cache_misses: u64,
    validation_failures: u64,
}

/// Validates, caches, guards and runs tool invocations.
///
/// # Example
///
/// ```ignore
/// let executor = ToolExecutor::new(ToolExecutorConfig::default(), ToolSet::simulated())?;
/// let out = executor
///     .execute_tool("calc", json!({"a": 1, "b": 2}), None, true)
///     .await?;
/// assert_eq!(executor.get_stats().cache_misses, 1);
/// ```
pub struct ToolExecutor {
    config: ToolExecutorConfig,
    tools: ToolSet,
    guard: RecursionGuard,
    backend: RwLock<ToolExecutorBackend>,
    counters: Mutex<Counters>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("config", &self.config)
            .field("tools", &self.tools)
            .field("backend", &self.backend_name())
            .field("in_flight", &self.guard.depth())
            .finish()
    }
}

impl ToolExecutor {
    /// Build an executor. Fails if `config` does not validate.
    pub fn new(config: ToolExecutorConfig, tools: ToolSet) -> Result<Self, ConfigError> {
        config.validate()?;

        let backend = match config.backend {
            BackendPreference::Auto | BackendPreference::Native => {
                ToolExecutorBackend::native(config.cache_ttl)
            }
            BackendPreference::Fallback => {
                ToolExecutorBackend::fallback(config.cache_ttl, config.cache_max_entries)
            }
        };
        info!(
            "Tool executor ready: backend={}, max_recursion_depth={}, ttl={:.0}s, {} tools",
            backend.name(),
            config.max_recursion_depth,
            config.cache_ttl.as_secs_f64(),
            tools.len(),
        );

        Ok(Self {
            guard: RecursionGuard::new(config.max_recursion_depth),
            backend: RwLock::new(backend),
            counters: Mutex::new(Counters::default()),
            config,
            tools,
        })
    }

    pub fn config(&self) -> &ToolExecutorConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    // ── Validation ──────────────────────────────────────────────────

    /// Check that `arguments` is JSON. Counts one validation failure when
    /// it is not.
    pub fn validate_args(&self, arguments: impl Into<ToolArguments>) -> Result<(), ValidationError> {
        let arguments = arguments.into();
        match arguments.parse() {
            Ok(_) => Ok(()),
            Err(e) => {
                self.record_validation_failure();
                Err(e)
            }
        }
    }

    /// Validate each entry independently. Counters are not touched.
    pub fn batch_validate<I, A>(&self, args_list: I) -> Vec<bool>
    where
        I: IntoIterator<Item = A>,
        A: Into<ToolArguments>,
    {
        args_list
            .into_iter()
            .map(|a| a.into().parse().is_ok())
            .collect()
    }

    /// Canonical encoding of `arguments`, as used for cache keys.
    /// Counters are not touched.
    pub fn parse_args(&self, arguments: impl Into<ToolArguments>) -> Result<String, ValidationError> {
        arguments.into().canonicalize()
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Invoke `tool_name`.
    ///
    /// `timeout` overrides the configured per-call timeout. With `use_cache`
    /// set, a fresh cached result is returned without touching the recursion
    /// guard, and a successful result is stored (unless the TTL is zero).
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        arguments: impl Into<ToolArguments>,
        timeout: Option<Duration>,
        use_cache: bool,
    ) -> Result<String, ToolError> {
        let canonical = self.prepare(tool_name, &arguments.into())?;
        log_tool_call(tool_name, &canonical);

        if use_cache {
            match self.cache_lookup(tool_name, &canonical) {
                Some(hit) => {
                    self.counters().cache_hits += 1;
                    debug!("[tool] {tool_name} served from cache ({} bytes)", hit.len());
                    return Ok(hit);
                }
                None => self.counters().cache_misses += 1,
            }
        }

        let permit = self.guard.enter().map_err(|e| {
            warn!("[tool] {tool_name} rejected: {} invocations already in flight", e.max_depth);
            ToolError::RecursionLimitExceeded {
                tool: tool_name.to_string(),
                max_depth: e.max_depth,
            }
        })?;

        let Some(tool) = self.tools.resolve(tool_name) else {
            return Err(ToolError::Execution {
                tool: tool_name.to_string(),
                message: "unknown tool".into(),
            });
        };

        let limit = timeout.unwrap_or(self.config.timeout);
        let start = Instant::now();
        // `execute_as` itself may panic, not only the future it returns.
        let body =
            AssertUnwindSafe(async { tool.execute_as(tool_name, &canonical).await }).catch_unwind();
        let outcome = tokio::time::timeout(limit, body).await;
        let elapsed = start.elapsed();
        drop(permit);

        let result = match outcome {
            Err(_) => {
                warn!(
                    "[tool] {tool_name} timed out after {:.1}s (limit: {:.1}s)",
                    elapsed.as_secs_f64(),
                    limit.as_secs_f64(),
                );
                return Err(ToolError::Timeout {
                    tool: tool_name.to_string(),
                    after: limit,
                });
            }
            Ok(Err(payload)) => {
                let message = crate::panic_message(payload.as_ref());
                warn!("[tool] {tool_name} panicked: {message}");
                return Err(ToolError::Execution {
                    tool: tool_name.to_string(),
                    message: format!("tool panicked: {message}"),
                });
            }
            Ok(Ok(Err(message))) => {
                debug!(
                    "[tool] {tool_name} failed in {:.0}ms: {message}",
                    elapsed.as_secs_f64() * 1000.0
                );
                return Err(ToolError::Execution {
                    tool: tool_name.to_string(),
                    message,
                });
            }
            Ok(Ok(Ok(result))) => result,
        };

        if use_cache && !self.config.cache_ttl.is_zero() {
            self.cache_store(tool_name, &canonical, result.clone());
        }
        self.counters().total_executions += 1;

        debug!(
            "[tool] {tool_name} completed in {:.0}ms ({} bytes)",
            elapsed.as_secs_f64() * 1000.0,
            result.len()
        );
        trace!(
            "[tool] {tool_name} result preview: {}",
            result.chars().take(300).collect::<String>()
        );
        Ok(result)
    }

    /// Whether a new invocation would currently get past the recursion guard.
    pub fn can_execute(&self) -> bool {
        self.guard.can_enter()
    }

    /// Invocations currently holding a guard slot.
    pub fn in_flight(&self) -> usize {
        self.guard.depth()
    }

    // ── Stats & cache management ────────────────────────────────────

    pub fn get_stats(&self) -> ExecutionStats {
        let c = *self.counters();
        let lookups = c.cache_hits + c.cache_misses;
        ExecutionStats {
            total_executions: c.total_executions,
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            validation_failures: c.validation_failures,
            cache_hit_rate_percent: (lookups > 0).then(|| c.cache_hits * 100 / lookups),
            cache_entries: self.cache_len(),
            backend: self.backend_name(),
            in_flight: self.guard.depth(),
            max_recursion_depth: self.guard.max_depth(),
        }
    }

    /// Zero every counter. Cached results stay.
    pub fn reset_stats(&self) {
        *self.counters() = Counters::default();
    }

    /// Drop every cached result, returning how many were removed.
    pub fn clear_cache(&self) -> usize {
        let removed = self.on_backend(|b| b.clear()).unwrap_or_else(|e| {
            warn!("Cache clear failed: {e}");
            0
        });
        debug!("Cleared {removed} cached tool results");
        removed
    }

    /// Stored cache entries (expired ones included until purged).
    pub fn cache_len(&self) -> usize {
        self.on_backend(|b| b.len()).unwrap_or(0)
    }

    /// Drop expired cache entries, returning how many were removed.
    pub fn purge_expired_cache(&self) -> usize {
        self.on_backend(|b| b.purge_expired()).unwrap_or(0)
    }

    /// Name of the backend currently in use.
    pub fn backend_name(&self) -> &'static str {
        self.backend.read().unwrap_or_else(|e| e.into_inner()).name()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_validation_failure(&self) {
        self.counters().validation_failures += 1;
    }

    /// Name and argument checks. Every failure counts once.
    fn prepare(&self, tool_name: &str, arguments: &ToolArguments) -> Result<String, ToolError> {
        let checked = if tool_name.trim().is_empty() {
            Err(ValidationError::new("tool name must not be empty"))
        } else {
            arguments.parse().and_then(|value| {
                if self.config.validate_schemas {
                    self.tools.validate_arguments(tool_name, &value)?;
                }
                Ok(super::args::canonical_json(&value))
            })
        };
        checked.map_err(|e| {
            self.record_validation_failure();
            debug!("[tool] {tool_name} rejected: {e}");
            ToolError::Validation(e)
        })
    }

    fn cache_lookup(&self, tool_name: &str, canonical: &str) -> Option<String> {
        self.on_backend(|b| b.lookup(tool_name, canonical))
            .unwrap_or_else(|e| {
                warn!("Cache lookup failed, treating as a miss: {e}");
                None
            })
    }

    fn cache_store(&self, tool_name: &str, canonical: &str, result: String) {
        if let Err(e) = self.on_backend(|b| b.store(tool_name, canonical, result.clone())) {
            warn!("Cache store failed, result not cached: {e}");
        }
    }

    /// Run `op` on the current backend. A failure on the native backend
    /// switches this executor to the fallback backend and retries there once.
    fn on_backend<T>(
        &self,
        op: impl Fn(&ToolExecutorBackend) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let cause = {
            let backend = self.backend.read().unwrap_or_else(|e| e.into_inner());
            match op(&*backend) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            }
        };
        self.disable_acceleration(&cause);
        let backend = self.backend.read().unwrap_or_else(|e| e.into_inner());
        op(&*backend)
    }

    fn disable_acceleration(&self, cause: &BackendError) {
        let mut backend = self.backend.write().unwrap_or_else(|e| e.into_inner());
        if backend.is_native() {
            warn!("{cause}; disabling acceleration, switching to the fallback backend");
            *backend =
                ToolExecutorBackend::fallback(self.config.cache_ttl, self.config.cache_max_entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolDef;
    use crate::tools::core::{FnTool, Tool, ToolFuture};
    use serde_json::json;

    fn executor(config: ToolExecutorConfig) -> ToolExecutor {
        ToolExecutor::new(config, ToolSet::simulated()).unwrap()
    }

    struct FailingTool;

    impl Tool for FailingTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("broken", "Always fails", json!({"type": "object"}))
        }

        fn execute(&self, _arguments: &str) -> ToolFuture<'_> {
            Box::pin(async { Err("disk on fire".to_string()) })
        }
    }

    struct PanickingTool;

    impl Tool for PanickingTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("panicky", "Panics", json!({}))
        }

        fn execute(&self, _arguments: &str) -> ToolFuture<'_> {
            Box::pin(async { panic!("boom") })
        }
    }

    /// Panics while building its future rather than while polling it.
    struct EagerPanicTool;

    impl Tool for EagerPanicTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("eager", "Panics before returning a future", json!({}))
        }

        fn execute(&self, arguments: &str) -> ToolFuture<'_> {
            if arguments.contains("crash") {
                panic!("panicked outside the future");
            }
            Box::pin(async { Ok("fine".to_string()) })
        }
    }

    #[test]
    fn zero_recursion_depth_rejected_at_construction() {
        let err = ToolExecutor::new(
            ToolExecutorConfig::default().with_max_recursion_depth(0),
            ToolSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_recursion_depth", .. }));
    }

    #[test]
    fn backend_follows_preference() {
        let native = executor(ToolExecutorConfig::default());
        assert_eq!(native.backend_name(), "native");
        let fallback =
            executor(ToolExecutorConfig::default().with_backend(BackendPreference::Fallback));
        assert_eq!(fallback.backend_name(), "fallback");
    }

    #[tokio::test]
    async fn simulated_result_uses_canonical_args() {
        let ex = executor(ToolExecutorConfig::default());
        let out = ex
            .execute_tool("calc", r#"{"b": 2, "a": 1}"#, None, true)
            .await
            .unwrap();
        assert_eq!(out, r#"Executed calc with args: {"a":1,"b":2}"#);
    }

    #[tokio::test]
    async fn second_call_is_a_hit() {
        let ex = executor(ToolExecutorConfig::default());
        let first = ex.execute_tool("t", json!({"x": 1}), None, true).await.unwrap();
        let second = ex.execute_tool("t", json!({"x": 1}), None, true).await.unwrap();
        assert_eq!(first, second);

        let stats = ex.get_stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hit_rate_percent, Some(50));
        assert_eq!(stats.cache_entries, 1);
    }

    #[tokio::test]
    async fn no_cache_means_no_lookup() {
        let ex = executor(ToolExecutorConfig::default());
        ex.execute_tool("t", "{}", None, false).await.unwrap();
        ex.execute_tool("t", "{}", None, false).await.unwrap();
        let stats = ex.get_stats();
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.cache_hits + stats.cache_misses, 0);
        assert_eq!(stats.cache_hit_rate_percent, None);
        assert_eq!(stats.cache_entries, 0);
    }

    #[tokio::test]
    async fn zero_ttl_never_stores() {
        let ex = executor(ToolExecutorConfig::default().with_cache_ttl(Duration::ZERO));
        ex.execute_tool("t", "{}", None, true).await.unwrap();
        ex.execute_tool("t", "{}", None, true).await.unwrap();
        let stats = ex.get_stats();
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(ex.cache_len(), 0);
    }

    #[tokio::test]
    async fn malformed_arguments_count_once() {
        let ex = executor(ToolExecutorConfig::default());
        let err = ex.execute_tool("t", "{oops", None, true).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
        let stats = ex.get_stats();
        assert_eq!(stats.validation_failures, 1);
        assert_eq!(stats.cache_misses, 0);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn empty_tool_name_is_a_validation_error() {
        let ex = executor(ToolExecutorConfig::default());
        let err = ex.execute_tool("  ", "{}", None, true).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
        assert_eq!(ex.get_stats().validation_failures, 1);
    }

    #[tokio::test]
    async fn schema_mismatch_is_a_validation_error() {
        #[derive(serde::Deserialize)]
        struct Args {
            n: i64,
        }
        let tools = ToolSet::new().with(FnTool::new(
            ToolDef::new(
                "double",
                "Double n",
                json!({"type": "object", "properties": {"n": {"type": "integer"}}, "required": ["n"]}),
            ),
            |args: Args| async move { Ok((args.n * 2).to_string()) },
        ));
        let ex = ToolExecutor::new(ToolExecutorConfig::default(), tools).unwrap();

        assert_eq!(ex.execute_tool("double", json!({"n": 4}), None, true).await, Ok("8".into()));
        let err = ex.execute_tool("double", json!({"n": "4"}), None, true).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
        assert_eq!(ex.get_stats().validation_failures, 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached_and_release_the_guard() {
        let tools = ToolSet::new().with(FailingTool);
        let ex = ToolExecutor::new(ToolExecutorConfig::default(), tools).unwrap();

        for _ in 0..2 {
            let err = ex.execute_tool("broken", "{}", None, true).await.unwrap_err();
            assert_eq!(
                err,
                ToolError::Execution {
                    tool: "broken".into(),
                    message: "disk on fire".into()
                }
            );
        }
        let stats = ex.get_stats();
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.total_executions, 0);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(ex.cache_len(), 0);
    }

    #[tokio::test]
    async fn unknown_tool_without_fallback() {
        let ex = ToolExecutor::new(ToolExecutorConfig::default(), ToolSet::new()).unwrap();
        let err = ex.execute_tool("nope", "{}", None, true).await.unwrap_err();
        assert_eq!(err.to_string(), "tool 'nope' failed: unknown tool");
        assert_eq!(ex.in_flight(), 0);
    }

    #[tokio::test]
    async fn panicking_tool_becomes_execution_error() {
        let tools = ToolSet::new().with(PanickingTool);
        let ex = ToolExecutor::new(ToolExecutorConfig::default(), tools).unwrap();
        let err = ex.execute_tool("panicky", "{}", None, true).await.unwrap_err();
        match err {
            ToolError::Execution { message, .. } => assert!(message.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ex.in_flight(), 0);
    }

    #[tokio::test]
    async fn panic_before_future_is_built_becomes_execution_error() {
        let tools = ToolSet::new().with(EagerPanicTool);
        let ex = ToolExecutor::new(ToolExecutorConfig::default(), tools).unwrap();

        let err = ex
            .execute_tool("eager", json!({"crash": 1}), None, true)
            .await
            .unwrap_err();
        match err {
            ToolError::Execution { tool, message } => {
                assert_eq!(tool, "eager");
                assert!(message.contains("panicked outside the future"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ex.in_flight(), 0);

        // The executor keeps working afterwards.
        assert_eq!(
            ex.execute_tool("eager", json!({"ok": 1}), None, true).await,
            Ok("fine".to_string())
        );
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let tools = ToolSet::new().with(FnTool::new(
            ToolDef::new("slow", "Sleeps", json!({})),
            |_: serde_json::Value| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".to_string())
            },
        ));
        let ex = ToolExecutor::new(ToolExecutorConfig::default(), tools).unwrap();
        let err = ex
            .execute_tool("slow", "{}", Some(Duration::from_millis(20)), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(!err.is_retryable());
        assert_eq!(ex.in_flight(), 0);
        assert_eq!(ex.cache_len(), 0);
    }

    #[test]
    fn validate_and_batch_validate() {
        let ex = executor(ToolExecutorConfig::default());
        assert!(ex.validate_args(r#"{"a":1}"#).is_ok());
        assert!(ex.validate_args(json!([1, 2])).is_ok());
        assert!(ex.validate_args("nope").is_err());
        assert_eq!(ex.get_stats().validation_failures, 1);

        let verdicts = ex.batch_validate([r#"{"a":1}"#, "bad", "[]", ""]);
        assert_eq!(verdicts, vec![true, false, true, false]);
        assert_eq!(ex.get_stats().validation_failures, 1);
    }

    #[test]
    fn parse_args_is_canonical() {
        let ex = executor(ToolExecutorConfig::default());
        assert_eq!(
            ex.parse_args(r#"{ "b": [1, 2], "a": {"d": 0, "c": 1} }"#).unwrap(),
            r#"{"a":{"c":1,"d":0},"b":[1,2]}"#
        );
    }

    #[tokio::test]
    async fn clear_and_reset() {
        let ex = executor(ToolExecutorConfig::default());
        ex.execute_tool("a", "{}", None, true).await.unwrap();
        ex.execute_tool("b", "{}", None, true).await.unwrap();
        assert_eq!(ex.clear_cache(), 2);
        assert_eq!(ex.clear_cache(), 0);

        ex.reset_stats();
        let stats = ex.get_stats();
        assert_eq!(stats.total_executions, 0);
        assert_eq!(stats.cache_misses, 0);
    }

    #[tokio::test]
    async fn native_failure_switches_to_fallback_once() {
        let ex = executor(ToolExecutorConfig::default());
        ex.execute_tool("t", "{}", None, true).await.unwrap();

        {
            let backend = ex.backend.read().unwrap();
            match &*backend {
                ToolExecutorBackend::Native(native) => native.poison(),
                ToolExecutorBackend::Fallback(_) => panic!("expected native backend"),
            }
        }

        // The lookup fails on native, retries on a fresh fallback cache.
        let out = ex.execute_tool("t", "{}", None, true).await.unwrap();
        assert_eq!(out, "Executed t with args: {}");
        assert_eq!(ex.backend_name(), "fallback");

        let out = ex.execute_tool("t", "{}", None, true).await.unwrap();
        assert_eq!(out, "Executed t with args: {}");
        let stats = ex.get_stats();
        assert_eq!(stats.backend, "fallback");
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.cache_hits, 1);
    }

    #[test]
    fn stats_serialize_without_rate_before_lookups() {
        let ex = executor(ToolExecutorConfig::default());
        let value = serde_json::to_value(ex.get_stats()).unwrap();
        assert!(value.get("cache_hit_rate_percent").is_none());
        assert_eq!(value["backend"], "native");
    }
}
