//! Result-cache backends behind one interface.
//!
//! A [`ToolExecutor`](super::executor::ToolExecutor) keeps its cache in one of
//! two backends, picked once at construction:
//!
//! - [`NativeBackend`]: unbounded, expires lazily, treats a poisoned lock as
//!   a failure and reports it.
//! - [`FallbackBackend`]: bounded by `cache_max_entries`, sweeps expired
//!   entries every [`SWEEP_EVERY_MISSES`] misses, and recovers poisoned locks.
//!
//! The executor's only backend transition is Native to Fallback after a
//! [`BackendError`]; it never goes back.

use super::cache::ResultCache;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// How many lookup misses the fallback backend allows between sweeps.
pub const SWEEP_EVERY_MISSES: usize = 10;

/// A backend could not serve a cache operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{backend} backend failed: {message}")]
pub struct BackendError {
    pub backend: &'static str,
    pub message: String,
}

/// Cache operations an executor needs from its backend.
pub trait ExecutionBackend: Send + Sync {
    /// Short name reported in stats and logs.
    fn name(&self) -> &'static str;

    /// Fresh cached result for `(tool_name, arguments)`, if any.
    fn lookup(&self, tool_name: &str, arguments: &str) -> Result<Option<String>, BackendError>;

    fn store(&self, tool_name: &str, arguments: &str, result: String) -> Result<(), BackendError>;

    /// Drop every entry, returning how many were removed.
    fn clear(&self) -> Result<usize, BackendError>;

    /// Stored entries, including expired ones not yet purged.
    fn len(&self) -> Result<usize, BackendError>;

    fn is_empty(&self) -> Result<bool, BackendError> {
        self.len().map(|n| n == 0)
    }

    /// Drop expired entries, returning how many were removed.
    fn purge_expired(&self) -> Result<usize, BackendError>;
}

// ── Native ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct NativeBackend {
    cache: Mutex<ResultCache>,
}

impl NativeBackend {
    pub const NAME: &'static str = "native";

    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(ResultCache::new(ttl)),
        }
    }

    fn with_cache<T>(&self, op: impl FnOnce(&mut ResultCache) -> T) -> Result<T, BackendError> {
        let mut cache = self.cache.lock().map_err(|_| BackendError {
            backend: Self::NAME,
            message: "cache lock poisoned".into(),
        })?;
        Ok(op(&mut cache))
    }

    /// Poison the cache lock, as a panic inside a cache operation would.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _cache = self.cache.lock();
            panic!("poisoning native cache");
        }));
    }
}

impl ExecutionBackend for NativeBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn lookup(&self, tool_name: &str, arguments: &str) -> Result<Option<String>, BackendError> {
        self.with_cache(|c| c.get(tool_name, arguments).map(str::to_string))
    }

    fn store(&self, tool_name: &str, arguments: &str, result: String) -> Result<(), BackendError> {
        self.with_cache(|c| c.put(tool_name, arguments, result))
    }

    fn clear(&self) -> Result<usize, BackendError> {
        self.with_cache(|c| c.clear())
    }

    fn len(&self) -> Result<usize, BackendError> {
        self.with_cache(|c| c.len())
    }

    fn purge_expired(&self) -> Result<usize, BackendError> {
        self.with_cache(|c| c.purge_expired())
    }
}

// ── Fallback ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FallbackBackend {
    cache: Mutex<ResultCache>,
    misses_since_sweep: AtomicUsize,
}

impl FallbackBackend {
    pub const NAME: &'static str = "fallback";

    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: Mutex::new(ResultCache::bounded(ttl, max_entries)),
            misses_since_sweep: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResultCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ExecutionBackend for FallbackBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn lookup(&self, tool_name: &str, arguments: &str) -> Result<Option<String>, BackendError> {
        let mut cache = self.lock();
        if let Some(hit) = cache.get(tool_name, arguments) {
            return Ok(Some(hit.to_string()));
        }
        let misses = self.misses_since_sweep.fetch_add(1, Ordering::Relaxed) + 1;
        if misses >= SWEEP_EVERY_MISSES {
            self.misses_since_sweep.store(0, Ordering::Relaxed);
            let removed = cache.purge_expired();
            if removed > 0 {
                debug!("Fallback cache sweep removed {removed} expired entries");
            }
        }
        Ok(None)
    }

    fn store(&self, tool_name: &str, arguments: &str, result: String) -> Result<(), BackendError> {
        self.lock().put(tool_name, arguments, result);
        Ok(())
    }

    fn clear(&self) -> Result<usize, BackendError> {
        Ok(self.lock().clear())
    }

    fn len(&self) -> Result<usize, BackendError> {
        Ok(self.lock().len())
    }

    fn purge_expired(&self) -> Result<usize, BackendError> {
        Ok(self.lock().purge_expired())
    }
}

// ── Selection ──────────────────────────────────────────────────────

/// The backend an executor is currently running on.
#[derive(Debug)]
pub enum ToolExecutorBackend {
    Native(NativeBackend),
    Fallback(FallbackBackend),
}

impl ToolExecutorBackend {
    pub fn native(ttl: Duration) -> Self {
        ToolExecutorBackend::Native(NativeBackend::new(ttl))
    }

    pub fn fallback(ttl: Duration, max_entries: usize) -> Self {
        ToolExecutorBackend::Fallback(FallbackBackend::new(ttl, max_entries))
    }

    pub fn is_native(&self) -> bool {
        matches!(self, ToolExecutorBackend::Native(_))
    }

    fn inner(&self) -> &dyn ExecutionBackend {
        match self {
            ToolExecutorBackend::Native(b) => b,
            ToolExecutorBackend::Fallback(b) => b,
        }
    }
}

impl ExecutionBackend for ToolExecutorBackend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn lookup(&self, tool_name: &str, arguments: &str) -> Result<Option<String>, BackendError> {
        self.inner().lookup(tool_name, arguments)
    }

    fn store(&self, tool_name: &str, arguments: &str, result: String) -> Result<(), BackendError> {
        self.inner().store(tool_name, arguments, result)
    }

    fn clear(&self) -> Result<usize, BackendError> {
        self.inner().clear()
    }

    fn len(&self) -> Result<usize, BackendError> {
        self.inner().len()
    }

    fn purge_expired(&self) -> Result<usize, BackendError> {
        self.inner().purge_expired()
    }
}
