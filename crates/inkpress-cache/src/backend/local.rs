//! In-process backend built on `DashMap`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::{CacheBackend, MAX_TTL};
use crate::CacheResult;
use crate::pattern::KeyPattern;

/// A cached entry with its expiry deadline.
///
/// The data is wrapped in `Arc` so a hit clones a pointer while the shard
/// lock is held, and the byte copy happens after it is released.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub expires_at: Instant,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .unwrap_or(now + Duration::from_secs(1));
        Self {
            data: Arc::new(data),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }
}

/// Node-local cache. Expiry is lazy on access, plus a periodic sweep when
/// [`LocalBackend::spawn_sweeper`] is running.
pub struct LocalBackend {
    entries: DashMap<String, CachedEntry>,
    max_entries: usize,
    evictions: AtomicU64,
}

impl LocalBackend {
    /// Create a local backend holding at most `max_entries` entries
    /// (0 means unbounded).
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Number of entries removed because they expired or made room.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }

        removed
    }

    /// Spawn a task that sweeps expired entries every `interval`.
    ///
    /// The task holds a weak reference and ends once the backend is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(backend) = weak.upgrade() else {
                    break;
                };
                let removed = backend.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired local cache entries");
                }
            }
        })
    }

    /// Make room for one more entry when the backend is at capacity.
    fn make_room(&self) {
        if self.max_entries == 0 || self.entries.len() < self.max_entries {
            return;
        }

        if self.cleanup_expired() > 0 && self.entries.len() < self.max_entries {
            return;
        }

        // Drop the entry closest to expiry
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key = %key, "evicted local cache entry to make room");
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[async_trait]
impl CacheBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let data = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(Arc::clone(&entry.data)),
            Some(entry) => {
                // Expired, remove it
                drop(entry);
                if self
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired())
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
            None => None,
        };

        Ok(data.map(|d| d.as_ref().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        if !self.entries.contains_key(key) {
            self.make_room();
        }
        self.entries
            .insert(key.to_string(), CachedEntry::new(value, ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired()))
    }

    async fn flush(&self) -> CacheResult<()> {
        self.entries.clear();
        Ok(())
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<usize> {
        if pattern.is_literal() {
            return self.del(pattern.as_str()).await.map(usize::from);
        }

        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            if !pattern.matches(key) {
                return true;
            }
            if entry.expires_at > now {
                removed += 1;
            }
            false
        });

        Ok(removed)
    }

    async fn key_count(&self) -> CacheResult<usize> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.value().expires_at > now)
            .count())
    }
}
