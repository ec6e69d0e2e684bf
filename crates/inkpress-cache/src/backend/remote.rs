//! Redis backend with connection-state tracking.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{CacheBackend, ConnectionState, MAX_TTL};
use crate::pattern::KeyPattern;
use crate::settings::RedisConfig;
use crate::{CacheError, CacheResult};

const SCAN_BATCH: usize = 500;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Shared cache on Redis.
///
/// Every failed call that points at a broken connection marks the backend
/// [`ConnectionState::Disconnected`]; a health monitor (see
/// [`RedisBackend::spawn_health_monitor`]) checks it with `PING` and marks it
/// connected again once Redis answers.
pub struct RedisBackend {
    pool: Pool,
    key_prefix: String,
    timeout: Duration,
    state: watch::Sender<ConnectionState>,
}

impl RedisBackend {
    /// Wrap an existing pool. The backend starts disconnected until
    /// [`RedisBackend::connect`] or the health monitor succeeds.
    pub fn new(pool: Pool, key_prefix: impl Into<String>, timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            pool,
            key_prefix: key_prefix.into(),
            timeout,
            state,
        }
    }

    /// Build the connection pool from configuration.
    pub fn from_config(url: &str, config: &RedisConfig) -> CacheResult<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(url);
        let timeout = config.timeout();
        if let Some(ref mut pool_config) = redis_config.pool {
            pool_config.max_size = config.pool_size;
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
        } else {
            let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
            redis_config.pool = Some(pool_config);
        }

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheError::pool(e.to_string()))?;

        Ok(Self::new(pool, config.key_prefix.clone(), timeout))
    }

    /// Ping the server once and record the result.
    pub async fn connect(&self) -> bool {
        match self.ping().await {
            Ok(()) => {
                self.mark(ConnectionState::Connected);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis connection check failed");
                self.mark(ConnectionState::Disconnected);
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Subscribe to connection-state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Spawn a task that keeps probing Redis.
    ///
    /// While connected it pings every `interval`; while disconnected it
    /// retries with exponential backoff, starting at `interval`. The task
    /// ends once the backend is dropped.
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut backoff = interval;
            loop {
                let delay = match weak.upgrade() {
                    Some(backend) if backend.is_connected() => interval,
                    Some(_) => backoff,
                    None => break,
                };
                tokio::time::sleep(delay).await;

                let Some(backend) = weak.upgrade() else {
                    break;
                };
                match backend.ping().await {
                    Ok(()) => {
                        backend.mark(ConnectionState::Connected);
                        backoff = interval;
                    }
                    Err(e) => {
                        tracing::debug!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "Redis health check failed"
                        );
                        backend.mark(ConnectionState::Disconnected);
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    fn mark(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            match next {
                ConnectionState::Connected => tracing::info!("Redis cache connected"),
                ConnectionState::Disconnected => {
                    tracing::warn!("Redis cache disconnected, falling back to local cache")
                }
            }
        }
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        let timeout = self.timeout;
        let pong: String = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| CacheError::timeout("ping"))??;
        tracing::trace!(reply = %pong, "Redis PING");
        Ok(())
    }

    /// Run one command against a pooled connection, bounded by the
    /// configured timeout, and record connectivity failures.
    async fn run<T, F, Fut>(&self, operation: &'static str, f: F) -> CacheResult<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let result = async {
            let conn = self.pool.get().await?;
            tokio::time::timeout(self.timeout, f(conn))
                .await
                .map_err(|_| CacheError::timeout(operation))?
        }
        .await;

        if let Err(ref e) = result
            && e.is_connectivity()
        {
            self.mark(ConnectionState::Disconnected);
        }
        result
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// The pattern as sent to `SCAN MATCH`, with the prefix escaped so it
    /// only matches literally.
    fn prefixed_pattern(&self, pattern: &KeyPattern) -> String {
        let mut out = String::with_capacity(self.key_prefix.len() + pattern.as_str().len());
        for c in self.key_prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out.push_str(pattern.as_str());
        out
    }
}

/// Walk the keyspace with `SCAN MATCH`, handing each batch to `on_batch`.
async fn scan_batches<F>(conn: &mut Connection, pattern: &str, mut on_batch: F) -> CacheResult<()>
where
    F: FnMut(Vec<String>) -> Option<Vec<String>>,
{
    let mut cursor: u64 = 0;
    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(conn)
            .await?;

        if let Some(to_delete) = on_batch(keys)
            && !to_delete.is_empty()
        {
            let _: usize = conn.del(&to_delete).await?;
        }

        if next == 0 {
            return Ok(());
        }
        cursor = next;
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let key = self.prefixed(key);
        self.run("get", |mut conn| async move {
            Ok(conn.get::<_, Option<Vec<u8>>>(&key).await?)
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let key = self.prefixed(key);
        // SET EX rejects 0
        let ttl_secs = ttl.min(MAX_TTL).as_secs().max(1);
        self.run("set", |mut conn| async move {
            conn.set_ex::<_, _, ()>(&key, value, ttl_secs).await?;
            Ok(())
        })
        .await
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        let key = self.prefixed(key);
        self.run("del", |mut conn| async move {
            let removed: usize = conn.del(&key).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let key = self.prefixed(key);
        self.run("exists", |mut conn| async move {
            Ok(conn.exists::<_, bool>(&key).await?)
        })
        .await
    }

    async fn flush(&self) -> CacheResult<()> {
        if !self.key_prefix.is_empty() {
            self.delete_matching(&KeyPattern::new("*")).await?;
            return Ok(());
        }

        self.run("flush", |mut conn| async move {
            let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<usize> {
        if pattern.is_literal() {
            return self.del(pattern.as_str()).await.map(usize::from);
        }

        let scan_pattern = self.prefixed_pattern(pattern);
        self.run("delete_matching", |mut conn| async move {
            let mut deleted = 0usize;
            scan_batches(&mut conn, &scan_pattern, |keys| {
                deleted += keys.len();
                Some(keys)
            })
            .await?;
            Ok(deleted)
        })
        .await
    }

    async fn key_count(&self) -> CacheResult<usize> {
        if self.key_prefix.is_empty() {
            return self
                .run("key_count", |mut conn| async move {
                    let size: usize = redis::cmd("DBSIZE").query_async(&mut conn).await?;
                    Ok(size)
                })
                .await;
        }

        let scan_pattern = self.prefixed_pattern(&KeyPattern::new("*"));
        self.run("key_count", |mut conn| async move {
            let mut count = 0usize;
            scan_batches(&mut conn, &scan_pattern, |keys| {
                count += keys.len();
                None
            })
            .await?;
            Ok(count)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_backend(prefix: &str) -> RedisBackend {
        let config = RedisConfig {
            url: Some("redis://127.0.0.1:1".to_string()),
            timeout_ms: 200,
            key_prefix: prefix.to_string(),
            ..Default::default()
        };
        RedisBackend::from_config("redis://127.0.0.1:1", &config).expect("pool")
    }

    #[test]
    fn test_prefixed_pattern_escapes_prefix() {
        let backend = unreachable_backend("site[1]:");
        assert_eq!(
            backend.prefixed_pattern(&KeyPattern::new("content:*")),
            r"site\[1\]:content:*"
        );
        assert_eq!(backend.prefixed("a"), "site[1]:a");
    }

    #[tokio::test]
    async fn test_unreachable_server_stays_disconnected() {
        let backend = unreachable_backend("");
        assert!(!backend.is_connected());
        assert!(!backend.connect().await);
        assert!(!backend.is_connected());

        let err = backend.get("missing").await.unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(*backend.connection_state().borrow(), ConnectionState::Disconnected);
    }
}
