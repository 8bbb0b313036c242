//! Drive the tool and task executors from the command line.
//!
//! Configuration comes from `CREW_ACCEL_*` environment variables; flags
//! override them. Statistics are printed to stdout as JSON, logs go to
//! stderr.
//!
//! # Examples
//!
//! ```sh
//! # Run a simulated tool three times and watch the cache hit
//! crew-accel tool search '{"q": "rust"}' --repeat 3
//!
//! # Run a batch of tasks on two workers with a five second deadline
//! crew-accel batch task_0 task_1 task_2 --workers 2 --timeout 5
//!
//! # Check which argument strings are valid JSON
//! crew-accel validate '{"a": 1}' 'not json'
//! ```

use clap::{Parser, Subcommand};
use crew_accel::config::{BackendPreference, TaskExecutorConfig, ToolExecutorConfig};
use crew_accel::logging::LogLayer;
use crew_accel::tasks::TaskExecutor;
use crew_accel::tools::{ToolExecutor, ToolSet};
use serde_json::json;
use std::process;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "crew-accel", version)]
struct Cli {
    /// Log verbosity on stderr (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a simulated tool and print executor statistics
    Tool {
        /// Tool name
        name: String,

        /// Arguments as a JSON string
        #[arg(default_value = "{}")]
        args: String,

        /// Run the same call this many times
        #[arg(long, default_value_t = 1)]
        repeat: usize,

        /// Bypass the result cache
        #[arg(long)]
        no_cache: bool,

        /// Per-call timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Backend to start on (auto, native, fallback)
        #[arg(long)]
        backend: Option<String>,

        /// Result cache TTL in seconds
        #[arg(long)]
        cache_ttl: Option<f64>,
    },

    /// Run task descriptors through the worker pool
    Batch {
        /// Task descriptors, one per task
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Worker count
        #[arg(long)]
        workers: Option<usize>,

        /// Deadline for the whole batch in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Deadline for each task in seconds
        #[arg(long)]
        task_timeout: Option<f64>,
    },

    /// Report which argument strings are valid JSON
    Validate {
        /// Argument strings to check
        #[arg(required = true)]
        args: Vec<String>,
    },
}

fn seconds(field: &'static str, value: Option<f64>) -> Result<Option<Duration>, String> {
    value
        .map(|v| crew_accel::config::parse_seconds(field, &v.to_string()))
        .transpose()
        .map_err(|e| e.to_string())
}

async fn run(command: Command) -> Result<serde_json::Value, String> {
    match command {
        Command::Tool {
            name,
            args,
            repeat,
            no_cache,
            timeout,
            backend,
            cache_ttl,
        } => {
            let mut config = ToolExecutorConfig::from_env().map_err(|e| e.to_string())?;
            if let Some(backend) = backend {
                config = config.with_backend(BackendPreference::from_flag(&backend));
            }
            if let Some(ttl) = seconds("cache_ttl", cache_ttl)? {
                config = config.with_cache_ttl(ttl);
            }
            let timeout = seconds("timeout", timeout)?;
            let executor =
                ToolExecutor::new(config, ToolSet::simulated()).map_err(|e| e.to_string())?;

            let mut results = Vec::with_capacity(repeat);
            for _ in 0..repeat.max(1) {
                let result = match executor
                    .execute_tool(&name, args.as_str(), timeout, !no_cache)
                    .await
                {
                    Ok(output) => json!({ "ok": output }),
                    Err(e) => json!({ "error": e.to_string(), "retryable": e.is_retryable() }),
                };
                results.push(result);
            }
            Ok(json!({ "results": results, "stats": executor.get_stats() }))
        }

        Command::Batch {
            tasks,
            workers,
            timeout,
            task_timeout,
        } => {
            let mut config = TaskExecutorConfig::from_env().map_err(|e| e.to_string())?;
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }
            if let Some(limit) = seconds("task_timeout", task_timeout)? {
                config = config.with_task_timeout(Some(limit));
            }
            let timeout = seconds("timeout", timeout)?;
            let executor = TaskExecutor::new(config).map_err(|e| e.to_string())?;

            let outcomes = executor
                .execute_concurrent_tasks(tasks, timeout)
                .await
                .map_err(|e| e.to_string())?;
            let results: Vec<String> = outcomes.iter().map(ToString::to_string).collect();
            Ok(json!({ "results": results, "stats": executor.get_stats() }))
        }

        Command::Validate { args } => {
            let executor = ToolExecutor::new(ToolExecutorConfig::default(), ToolSet::new())
                .map_err(|e| e.to_string())?;
            let valid = executor.batch_validate(args.iter().map(String::as_str));
            Ok(json!({ "valid": valid }))
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(LogLayer::stderr(cli.log_level))
        .init();

    match run(cli.command).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
