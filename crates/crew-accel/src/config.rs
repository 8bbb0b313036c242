//! Construction-time configuration for [`ToolExecutor`](crate::tools::ToolExecutor)
//! and [`TaskExecutor`](crate::tasks::TaskExecutor).
//!
//! Both configs are plain structs with defaults and `with_*` builder methods.
//! Values are checked once by `validate()` when an executor is built; nothing
//! is re-read per call.
//!
//! Environment variables are only consulted through the `from_env()`
//! constructors, which are meant for the outermost layer (the CLI or an
//! embedding shim). Library code should take a config struct instead.
//!
//! ```ignore
//! let config = ToolExecutorConfig::default()
//!     .with_max_recursion_depth(10)
//!     .with_cache_ttl(Duration::from_secs(60));
//! let executor = ToolExecutor::new(config, ToolSet::simulated())?;
//! ```

use crate::error::ConfigError;
use std::time::Duration;

pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 100;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_WORKERS: usize = 4;

/// Prefix shared by every environment variable read in `from_env()`.
pub const ENV_PREFIX: &str = "CREW_ACCEL_";

// ── Backend preference ────────────────────────────────────────────

/// Which execution backend a [`ToolExecutor`](crate::tools::ToolExecutor)
/// should start on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Use the native backend when it is available.
    #[default]
    Auto,
    /// Always start on the native backend.
    Native,
    /// Always start on the fallback backend.
    Fallback,
}

impl BackendPreference {
    /// Parse the `auto` / `true` / `false` convention used by the
    /// `CREW_ACCEL_TOOLS` switch. Unrecognized values mean `Auto`.
    pub fn from_flag(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "native" => BackendPreference::Native,
            "false" | "0" | "no" | "off" | "fallback" => BackendPreference::Fallback,
            _ => BackendPreference::Auto,
        }
    }
}

// ── ToolExecutorConfig ────────────────────────────────────────────

/// Configuration for a [`ToolExecutor`](crate::tools::ToolExecutor).
#[derive(Debug, Clone)]
pub struct ToolExecutorConfig {
    /// Maximum number of in-flight invocations per executor. Default: `100`.
    pub max_recursion_depth: usize,
    /// Default per-call timeout. Default: 30 seconds.
    pub timeout: Duration,
    /// How long a cached result stays readable. Zero disables caching.
    /// Default: 300 seconds.
    pub cache_ttl: Duration,
    /// Capacity of the fallback backend's cache. Default: `1000`.
    pub cache_max_entries: usize,
    /// Whether to check arguments against a tool's declared JSON Schema.
    pub validate_schemas: bool,
    pub backend: BackendPreference,
}

impl Default for ToolExecutorConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            timeout: DEFAULT_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            validate_schemas: true,
            backend: BackendPreference::Auto,
        }
    }
}

impl ToolExecutorConfig {
    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_cache_max_entries(mut self, max: usize) -> Self {
        self.cache_max_entries = max;
        self
    }

    pub fn with_schema_validation(mut self, enabled: bool) -> Self {
        self.validate_schemas = enabled;
        self
    }

    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    /// Reject values the executor cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_recursion_depth == 0 {
            return Err(ConfigError::invalid(
                "max_recursion_depth",
                "must be a positive integer",
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout_seconds", "must be positive"));
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::invalid(
                "cache_max_entries",
                "must be a positive integer",
            ));
        }
        Ok(())
    }

    /// Build a config from `CREW_ACCEL_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads through `lookup`, which
    /// receives the full variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(v) = var("TOOLS") {
            config.backend = BackendPreference::from_flag(&v);
        }
        if let Some(v) = var("MAX_RECURSION_DEPTH") {
            config.max_recursion_depth = parse_count("max_recursion_depth", &v)?;
        }
        if let Some(v) = var("TIMEOUT_SECONDS") {
            config.timeout = parse_seconds("timeout_seconds", &v)?;
        }
        if let Some(v) = var("CACHE_TTL_SECONDS") {
            config.cache_ttl = parse_seconds("cache_ttl_seconds", &v)?;
        }
        if let Some(v) = var("CACHE_MAX_SIZE") {
            config.cache_max_entries = parse_count("cache_max_entries", &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}

// ── TaskExecutorConfig ────────────────────────────────────────────

/// Configuration for a [`TaskExecutor`](crate::tasks::TaskExecutor).
#[derive(Debug, Clone)]
pub struct TaskExecutorConfig {
    /// Fixed worker pool size. Default: `4`.
    pub workers: usize,
    /// Per-task timeout applied inside every batch. `None` disables it.
    pub task_timeout: Option<Duration>,
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            task_timeout: None,
        }
    }
}

impl TaskExecutorConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be a positive integer"));
        }
        if self.task_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::invalid(
                "task_timeout_seconds",
                "must be positive when set",
            ));
        }
        Ok(())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(v) = var("WORKERS") {
            config.workers = parse_count("workers", &v)?;
        }
        if let Some(v) = var("TASK_TIMEOUT_SECONDS") {
            config.task_timeout = Some(parse_seconds("task_timeout_seconds", &v)?);
        }

        config.validate()?;
        Ok(config)
    }
}

// ── Parsing helpers ───────────────────────────────────────────────

fn parse_count(field: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::invalid(field, format!("'{raw}' is not a non-negative integer: {e}")))
}

/// Parse a non-negative, finite number of seconds (fractions allowed).
pub fn parse_seconds(field: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|e| ConfigError::invalid(field, format!("'{raw}' is not a number: {e}")))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ConfigError::invalid(field, format!("'{raw}' is not a non-negative duration")))
}
