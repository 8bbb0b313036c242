//! End-to-end behavior of the tool executor: caching, the in-flight
//! ceiling, timeouts and argument validation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crew_accel::prelude::*;
use serde_json::json;
use tokio::sync::Semaphore;

/// Holds every call until the test adds permits to `gate`.
struct GatedTool {
    gate: Arc<Semaphore>,
    calls: Arc<AtomicUsize>,
}

impl Tool for GatedTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new("gated", "Waits for the test to release it", json!({"type": "object"}))
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.map_err(|e| e.to_string())?;
            Ok(format!("released {arguments}"))
        })
    }
}

fn gated_executor(max_depth: usize) -> (Arc<ToolExecutor>, Arc<Semaphore>, Arc<AtomicUsize>) {
    let gate = Arc::new(Semaphore::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let tools = ToolSet::new().with(GatedTool {
        gate: Arc::clone(&gate),
        calls: Arc::clone(&calls),
    });
    let config = ToolExecutorConfig::default().with_max_recursion_depth(max_depth);
    (Arc::new(ToolExecutor::new(config, tools).unwrap()), gate, calls)
}

async fn wait_for_in_flight(executor: &ToolExecutor, expected: usize) {
    for _ in 0..200 {
        if executor.in_flight() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {expected} calls in flight, found {}",
        executor.in_flight()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ceiling_rejects_third_call_until_one_returns() {
    let (executor, gate, _) = gated_executor(2);

    let first = tokio::spawn({
        let executor = Arc::clone(&executor);
        async move { executor.execute_tool("gated", r#"{"n": 1}"#, None, false).await }
    });
    let second = tokio::spawn({
        let executor = Arc::clone(&executor);
        async move { executor.execute_tool("gated", r#"{"n": 2}"#, None, false).await }
    });
    wait_for_in_flight(&executor, 2).await;
    assert!(!executor.can_execute());

    let err = executor
        .execute_tool("gated", r#"{"n": 3}"#, None, false)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ToolError::RecursionLimitExceeded {
            tool: "gated".into(),
            max_depth: 2
        }
    );
    assert!(err.is_retryable());
    assert_eq!(executor.in_flight(), 2);

    gate.add_permits(3);
    assert_eq!(first.await.unwrap().unwrap(), r#"released {"n":1}"#);
    assert_eq!(second.await.unwrap().unwrap(), r#"released {"n":2}"#);
    assert_eq!(executor.in_flight(), 0);

    let retried = executor
        .execute_tool("gated", r#"{"n": 3}"#, None, false)
        .await
        .unwrap();
    assert_eq!(retried, r#"released {"n":3}"#);
    assert_eq!(executor.get_stats().total_executions, 3);
}

#[tokio::test]
async fn cached_result_expires_after_ttl() {
    let config = ToolExecutorConfig::default().with_cache_ttl(Duration::from_secs(1));
    let executor = ToolExecutor::new(config, ToolSet::simulated()).unwrap();
    let args = json!({"q": "rust"});

    let first = executor
        .execute_tool("search", args.clone(), None, true)
        .await
        .unwrap();
    assert_eq!(first, r#"Executed search with args: {"q":"rust"}"#);
    let second = executor
        .execute_tool("search", args.clone(), None, true)
        .await
        .unwrap();
    assert_eq!(second, first);

    let stats = executor.get_stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.total_executions, 1);
    assert_eq!(stats.cache_hit_rate_percent, Some(50));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    executor
        .execute_tool("search", args, None, true)
        .await
        .unwrap();

    let stats = executor.get_stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 2);
    assert_eq!(stats.total_executions, 2);
}

#[tokio::test]
async fn key_order_does_not_split_cache_entries() {
    let executor =
        ToolExecutor::new(ToolExecutorConfig::default(), ToolSet::simulated()).unwrap();

    executor
        .execute_tool("lookup", r#"{"b": 1, "a": {"y": 2, "x": 3}}"#, None, true)
        .await
        .unwrap();
    executor
        .execute_tool("lookup", json!({"a": {"x": 3, "y": 2}, "b": 1}), None, true)
        .await
        .unwrap();

    let stats = executor.get_stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_entries, 1);

    // Same arguments under another name are a different entry.
    executor
        .execute_tool("other", r#"{"b": 1, "a": {"y": 2, "x": 3}}"#, None, true)
        .await
        .unwrap();
    assert_eq!(executor.get_stats().cache_entries, 2);
}

#[tokio::test]
async fn cache_hit_skips_the_tool_body() {
    let (executor, gate, calls) = gated_executor(4);
    gate.add_permits(10);

    for _ in 0..3 {
        executor
            .execute_tool("gated", "{}", None, true)
            .await
            .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    executor
        .execute_tool("gated", "{}", None, false)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn clear_cache_forces_re_execution() {
    let executor =
        ToolExecutor::new(ToolExecutorConfig::default(), ToolSet::simulated()).unwrap();
    executor.execute_tool("t", "{}", None, true).await.unwrap();
    assert_eq!(executor.clear_cache(), 1);
    executor.execute_tool("t", "{}", None, true).await.unwrap();

    let stats = executor.get_stats();
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.cache_misses, 2);
}

#[tokio::test]
async fn timeout_releases_guard_and_is_not_cached() {
    let (executor, _gate, calls) = gated_executor(1);

    let err = executor
        .execute_tool("gated", "{}", Some(Duration::from_millis(50)), true)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ToolError::Timeout {
            tool: "gated".into(),
            after: Duration::from_millis(50)
        }
    );
    assert!(!err.is_retryable());
    assert_eq!(executor.in_flight(), 0);
    assert_eq!(executor.get_stats().cache_entries, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_and_panicking_tools_release_the_guard() {
    let tools = ToolSet::new()
        .with(FnTool::new(
            ToolDef::new("fails", "Always fails", json!({"type": "object"})),
            |_: serde_json::Value| async move { Err("disk on fire".to_string()) },
        ))
        .with(FnTool::new(
            ToolDef::new("panics", "Always panics", json!({"type": "object"})),
            |_: serde_json::Value| async move {
                if true {
                    panic!("tool bug");
                }
                Ok(String::new())
            },
        ));
    let executor = ToolExecutor::new(
        ToolExecutorConfig::default().with_max_recursion_depth(1),
        tools,
    )
    .unwrap();

    let err = executor
        .execute_tool("fails", "{}", None, true)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ToolError::Execution {
            tool: "fails".into(),
            message: "disk on fire".into()
        }
    );

    let err = executor
        .execute_tool("panics", "{}", None, true)
        .await
        .unwrap_err();
    match err {
        ToolError::Execution { tool, message } => {
            assert_eq!(tool, "panics");
            assert!(message.contains("tool bug"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(executor.in_flight(), 0);
    let stats = executor.get_stats();
    assert_eq!(stats.total_executions, 0);
    assert_eq!(stats.cache_entries, 0);
}

#[tokio::test]
async fn unknown_tool_without_fallback() {
    let executor = ToolExecutor::new(ToolExecutorConfig::default(), ToolSet::new()).unwrap();
    let err = executor
        .execute_tool("missing", "{}", None, true)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ToolError::Execution {
            tool: "missing".into(),
            message: "unknown tool".into()
        }
    );
    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_tool() {
    let (executor, gate, calls) = gated_executor(4);
    gate.add_permits(1);

    let err = executor
        .execute_tool("gated", "{not json", None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Validation(_)));

    let err = executor
        .execute_tool("gated", r#"[1, 2]"#, None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Validation(_)));

    let err = executor
        .execute_tool("", "{}", None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Validation(_)));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let stats = executor.get_stats();
    assert_eq!(stats.validation_failures, 3);
    assert_eq!(stats.cache_misses, 0);
}

#[tokio::test]
async fn batch_validate_checks_each_entry() {
    let executor = ToolExecutor::new(ToolExecutorConfig::default(), ToolSet::new()).unwrap();
    let valid = executor.batch_validate([r#"{"a": 1}"#, "not json", r#"{"nested": {"b": [1, 2]}}"#]);
    assert_eq!(valid, vec![true, false, true]);
    assert_eq!(executor.get_stats().validation_failures, 0);

    assert!(executor.validate_args("{").is_err());
    assert_eq!(executor.get_stats().validation_failures, 1);

    assert_eq!(
        executor.parse_args(r#"{"z": 1, "a": 2}"#).unwrap(),
        r#"{"a":2,"z":1}"#
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_all_complete() {
    let executor = Arc::new(
        ToolExecutor::new(ToolExecutorConfig::default(), ToolSet::simulated()).unwrap(),
    );
    let mut handles = Vec::new();
    for i in 0..20 {
        let executor = Arc::clone(&executor);
        handles.push(tokio::spawn(async move {
            executor
                .execute_tool("echo", json!({ "i": i }), None, true)
                .await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let out = handle.await.unwrap().unwrap();
        assert_eq!(out, format!(r#"Executed echo with args: {{"i":{i}}}"#));
    }
    let stats = executor.get_stats();
    assert_eq!(stats.total_executions, 20);
    assert_eq!(stats.cache_entries, 20);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn stats_serialize_for_reporting() {
    let executor =
        ToolExecutor::new(ToolExecutorConfig::default(), ToolSet::simulated()).unwrap();
    let fresh = serde_json::to_value(executor.get_stats()).unwrap();
    assert!(fresh.get("cache_hit_rate_percent").is_none());

    executor.execute_tool("t", "{}", None, true).await.unwrap();
    let stats = serde_json::to_value(executor.get_stats()).unwrap();
    assert_eq!(stats["total_executions"], 1);
    assert_eq!(stats["cache_hit_rate_percent"], 0);
    assert_eq!(stats["backend"], "native");
    assert_eq!(stats["max_recursion_depth"], 100);

    executor.reset_stats();
    assert_eq!(executor.get_stats().total_executions, 0);
    assert_eq!(executor.get_stats().cache_entries, 1);
}
