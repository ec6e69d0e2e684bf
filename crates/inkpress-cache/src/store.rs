//! JSON-level cache facade with fail-open semantics.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::backend::{CacheBackend, FallbackStore, LocalBackend, MAX_TTL, RedisBackend};
use crate::pattern::KeyPattern;
use crate::settings::CacheSettings;
use crate::stats::{CacheStats, Operation, OperationStats, hit_rate};

/// Process-wide cache handle.
///
/// Values are serialized to JSON on `set` and deserialized on `get`. No
/// method returns an error: backend failures are logged and degrade to a
/// miss, `false` or `0`, so a broken cache only ever costs a recompute.
///
/// Construct one with [`CacheStore::connect`] at startup, share it as
/// `Arc<CacheStore>`, and call [`CacheStore::close`] on shutdown.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    stats: OperationStats,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheStore {
    /// Wrap any backend.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            stats: OperationStats::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A local-only store without background tasks.
    pub fn new_local() -> Self {
        Self::new(Arc::new(FallbackStore::local_only(Arc::new(
            LocalBackend::unbounded(),
        ))))
    }

    /// Build the store from configuration.
    ///
    /// ## Backend selection
    ///
    /// - **Redis not configured**: local cache only
    /// - **Redis configured**: Redis is primary while connected, the local
    ///   cache serves every call made while it is not
    ///
    /// A failed initial connection is not fatal; the health monitor keeps
    /// probing and switches to Redis once it answers.
    pub async fn connect(settings: &CacheSettings) -> Self {
        let local = Arc::new(LocalBackend::new(settings.local.max_entries));
        let mut tasks = Vec::new();
        if settings.local.sweep_interval_secs > 0 {
            tasks.push(
                local.spawn_sweeper(Duration::from_secs(settings.local.sweep_interval_secs)),
            );
        }

        let Some(url) = settings.redis.connection_url() else {
            tracing::info!("Redis not configured, using local cache only");
            return Self::with_tasks(Arc::new(FallbackStore::local_only(local)), tasks);
        };

        let redis = match RedisBackend::from_config(&url, &settings.redis) {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to create Redis pool. Falling back to local cache."
                );
                return Self::with_tasks(Arc::new(FallbackStore::local_only(local)), tasks);
            }
        };

        if redis.connect().await {
            tracing::info!("Connected to Redis cache");
        } else {
            tracing::warn!("Redis unreachable at startup. Serving from local cache until it recovers.");
        }
        tasks.push(redis.spawn_health_monitor(settings.redis.health_check_interval()));

        let state = redis.connection_state();
        let fallback = FallbackStore::new(redis, state, local);
        Self::with_tasks(Arc::new(fallback), tasks)
    }

    fn with_tasks(backend: Arc<dyn CacheBackend>, tasks: Vec<JoinHandle<()>>) -> Self {
        let store = Self::new(backend);
        if let Ok(mut guard) = store.tasks.lock() {
            *guard = tasks;
        }
        store
    }

    /// Stop background tasks (health monitor, sweeper).
    pub fn close(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        tracing::debug!("cache store closed");
    }

    /// Name of the backend currently serving single-key operations.
    pub fn provider(&self) -> &'static str {
        self.backend.name()
    }

    /// Get and deserialize a value. `None` on miss or on any error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.stats.record(Operation::Get);
        let tier = self.backend.name();

        let bytes = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                self.stats.record_miss();
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, backend = tier, error = %e, "cache get failed");
                self.stats.record_error(Operation::Get, tier);
                self.stats.record_miss();
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                tracing::debug!(key = %key, tier, "cache hit");
                self.stats.record_hit(tier);
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cached value did not deserialize");
                self.stats.record_error(Operation::Get, tier);
                self.stats.record_miss();
                None
            }
        }
    }

    /// Serialize and store a value for `ttl_secs` seconds, clamped to
    /// between one second and [`MAX_TTL`].
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        self.stats.record(Operation::Set);
        let tier = self.backend.name();

        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "value could not be serialized for cache");
                self.stats.record_error(Operation::Set, tier);
                return false;
            }
        };

        let ttl = Duration::from_secs(ttl_secs.clamp(1, MAX_TTL.as_secs()));
        match self.backend.set(key, bytes, ttl).await {
            Ok(()) => {
                tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), tier, "cache set");
                true
            }
            Err(e) => {
                tracing::warn!(key = %key, backend = tier, error = %e, "cache set failed");
                self.stats.record_error(Operation::Set, tier);
                false
            }
        }
    }

    /// Remove a key from the active backend.
    pub async fn del(&self, key: &str) -> bool {
        self.stats.record(Operation::Del);
        match self.backend.del(key).await {
            Ok(removed) => removed,
            Err(e) => {
                let tier = self.backend.name();
                tracing::warn!(key = %key, backend = tier, error = %e, "cache del failed");
                self.stats.record_error(Operation::Del, tier);
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.stats.record(Operation::Exists);
        match self.backend.exists(key).await {
            Ok(found) => found,
            Err(e) => {
                let tier = self.backend.name();
                tracing::warn!(key = %key, backend = tier, error = %e, "cache exists failed");
                self.stats.record_error(Operation::Exists, tier);
                false
            }
        }
    }

    /// Clear every backend.
    pub async fn flush(&self) -> bool {
        self.stats.record(Operation::Flush);
        match self.backend.flush().await {
            Ok(()) => {
                tracing::info!("cache flushed");
                true
            }
            Err(e) => {
                let tier = self.backend.name();
                tracing::warn!(backend = tier, error = %e, "cache flush failed");
                self.stats.record_error(Operation::Flush, tier);
                false
            }
        }
    }

    /// Delete every key matching a glob pattern from every backend,
    /// returning the number removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.stats.record(Operation::Invalidate);
        let pattern = KeyPattern::new(pattern);
        match self.backend.delete_matching(&pattern).await {
            Ok(deleted) => {
                tracing::debug!(pattern = %pattern, deleted, "cache pattern invalidated");
                deleted
            }
            Err(e) => {
                let tier = self.backend.name();
                tracing::warn!(pattern = %pattern, backend = tier, error = %e, "cache pattern invalidation failed");
                self.stats.record_error(Operation::Invalidate, tier);
                0
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let key_count = match self.backend.key_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::debug!(error = %e, "cache key count unavailable");
                None
            }
        };
        let (hits, misses) = (self.stats.hits(), self.stats.misses());

        CacheStats {
            provider: self.backend.name().to_string(),
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            key_count,
            operations: self.stats.snapshot(),
        }
    }

    /// Build a deterministic key: `namespace:base_key[:k1=v1&k2=v2...]`.
    ///
    /// Params are sorted by name, so the same params in any order give the
    /// same key. A repeated name keeps its last value.
    pub fn generate_key<I, K, V>(namespace: &str, base_key: &str, params: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Display,
    {
        let sorted: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();

        if sorted.is_empty() {
            return format!("{namespace}:{base_key}");
        }

        let query = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{namespace}:{base_key}:{query}")
    }

    /// Read-through helper.
    ///
    /// On a miss, runs `compute`, stores its value and returns it. An error
    /// from `compute` is returned as is and nothing is stored. A failure to
    /// store never hides the computed value.
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, compute: F, ttl_secs: u64) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        let value = compute().await?;
        if !self.set(key, &value, ttl_secs).await {
            tracing::debug!(key = %key, "computed value returned uncached");
        }
        Ok(value)
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
