//! In-process TTL memoization cache
//!
//! Provides:
//! - Generic get/set operations with TTL (JSON-encoded values)
//! - Lazy expiry on read plus an explicit expiry sweep
//! - Loader-based memoization that never fails because of the cache
//! - Deterministic call fingerprints for model invocations

use crate::errors::Result;
use crate::metrics;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default TTL for entries
    pub default_ttl: Duration,
    /// Name used in logs and metrics labels
    pub name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            name: "llm".to_string(),
        }
    }
}

/// Stored entry: JSON payload plus its lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry {
    value: String,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    /// Visible iff `now < created + ttl`
    fn is_live(&self, now: Instant) -> bool {
        now < self.created_at + self.ttl
    }
}

/// Entry counts reported by [`TtlCache::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Entries physically present, expired or not
    pub total_entries: usize,
    /// Entries still visible to `get`
    pub active_entries: usize,
}

/// Concurrent TTL cache; locking is per shard so unrelated keys do not contend
pub struct TtlCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
}

impl TtlCache {
    /// Create a new cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Name used in logs and metrics
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get a value; expired or undecodable entries behave as a miss
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();

        let raw = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            _ => None,
        };

        let Some(json) = raw else {
            debug!(cache = %self.config.name, key, "Cache miss");
            metrics::record_cache(false, &self.config.name);
            return None;
        };

        match serde_json::from_str(&json) {
            Ok(value) => {
                debug!(cache = %self.config.name, key, "Cache hit");
                metrics::record_cache(true, &self.config.name);
                Some(value)
            }
            Err(e) => {
                warn!(cache = %self.config.name, key, error = %e, "Failed to decode cached value, treating as miss");
                metrics::record_cache(false, &self.config.name);
                None
            }
        }
    }

    /// Set a value with the default TTL
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        self.set_with_ttl(key, value, self.config.default_ttl)
    }

    /// Set a value with a custom TTL; failures are logged and swallowed
    pub fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(cache = %self.config.name, key, error = %e, "Failed to serialize value, not caching");
                return;
            }
        };

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: json,
                created_at: Instant::now(),
                ttl,
            },
        );
        debug!(cache = %self.config.name, key, ttl_secs = ttl.as_secs(), "Cache set");
    }

    /// Delete a key from cache
    pub fn delete(&self, key: &str) -> bool {
        let deleted = self.entries.remove(key).is_some();
        debug!(cache = %self.config.name, key, deleted, "Cache delete");
        deleted
    }

    /// Physically remove expired entries, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!(cache = %self.config.name, removed, "Expired cache entries removed");
        }
        removed
    }

    /// Current entry counts
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let total_entries = self.entries.len();
        let active_entries = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .count();

        CacheStats {
            total_entries,
            active_entries,
        }
    }

    /// Get or compute with a loader; only loader errors reach the caller
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get::<T>(key) {
            return Ok(cached);
        }

        let value = loader().await?;
        self.set_with_ttl(key, &value, ttl);
        Ok(value)
    }

    /// Default TTL configured for this cache
    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Cache key builder helpers
///
/// Keys are pure functions of the semantic inputs; call ids, timestamps and
/// other volatile metadata never take part.
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Operation name for relevance grading
    pub const GRADE_OPERATION: &str = "grade_documents";

    /// Operation name for question rewriting
    pub const REWRITE_OPERATION: &str = "rewrite_question";

    /// Collapse whitespace and case so trivially different phrasings share a key
    pub fn normalize_question(question: &str) -> String {
        question
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Fingerprint of an (operation, question, context) triple
    pub fn fingerprint(operation: &str, question: &str, context: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalize_question(question).as_bytes());
        hasher.update([0u8]);
        hasher.update(context.as_bytes());
        format!("{}:{}", operation, hex::encode(hasher.finalize()))
    }

    /// Build a grading cache key
    pub fn grade(question: &str, context_prefix: &str) -> String {
        fingerprint(GRADE_OPERATION, question, context_prefix)
    }

    /// Build a rewrite cache key
    pub fn rewrite(question: &str, context: &str) -> String {
        fingerprint(REWRITE_OPERATION, question, context)
    }
}
