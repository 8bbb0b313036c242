//! Tool result caching with time-based expiry.
//!
//! Avoids re-executing identical tool calls inside a TTL window. Results are
//! keyed by `(tool_name, canonical_arguments)`, where the arguments have
//! already been canonicalized by [`canonical_json`](super::args::canonical_json).
//! Expiry is evaluated when an entry is read; nothing runs in the background.
//!
//! The cache does not count hits or misses. The executor owns those counters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A cached tool result.
#[derive(Debug, Clone)]
struct CacheEntry {
    result: String,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.inserted_at) < ttl
    }
}

/// Cache for tool results, keyed by `(tool_name, canonical_arguments)`.
///
/// With a capacity set, a `put` into a full cache first drops expired
/// entries and then, if still full, the oldest entry.
#[derive(Debug)]
pub struct ResultCache {
    entries: HashMap<(String, String), CacheEntry>,
    ttl: Duration,
    /// `None` means unbounded.
    max_entries: Option<usize>,
}

impl ResultCache {
    /// Create an unbounded cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: None,
        }
    }

    /// Create a cache that holds at most `max_entries` results.
    pub fn bounded(ttl: Duration, max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries.max(1)),
            ..Self::new(ttl)
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    /// Look up a fresh result.
    pub fn get(&self, tool_name: &str, arguments: &str) -> Option<&str> {
        self.get_at(tool_name, arguments, Instant::now())
    }

    /// Like [`get`](Self::get), evaluated at `now`.
    pub fn get_at(&self, tool_name: &str, arguments: &str, now: Instant) -> Option<&str> {
        let key = (tool_name.to_string(), arguments.to_string());
        self.entries
            .get(&key)
            .filter(|entry| entry.is_fresh(now, self.ttl))
            .map(|entry| entry.result.as_str())
    }

    /// Store a result, overwriting any previous entry for the same key.
    pub fn put(&mut self, tool_name: &str, arguments: &str, result: String) {
        self.put_at(tool_name, arguments, result, Instant::now());
    }

    /// Like [`put`](Self::put), timestamped `now`.
    pub fn put_at(&mut self, tool_name: &str, arguments: &str, result: String, now: Instant) {
        let key = (tool_name.to_string(), arguments.to_string());
        if let Some(max) = self.max_entries
            && !self.entries.contains_key(&key)
            && self.entries.len() >= max
        {
            self.purge_expired_at(now);
            if self.entries.len() >= max {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: now,
            },
        );
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Drop entries whose TTL has run out. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.is_fresh(now, ttl));
        before - self.entries.len()
    }

    /// Number of stored entries, including ones that have expired but have
    /// not been purged yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|(_, v)| v.inserted_at)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest_key);
        }
    }
}
