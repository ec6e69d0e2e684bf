//! Storage backends behind [`crate::CacheStore`].
//!
//! ## Backends
//!
//! - **Local** ([`LocalBackend`]): in-process `DashMap`, per instance, lost on restart
//! - **Redis** ([`RedisBackend`]): shared across instances, native TTL
//! - **Fallback** ([`FallbackStore`]): Redis while it is connected, local otherwise
//!
//! ```text
//! CacheStore ──► FallbackStore ──► RedisBackend   (ConnectionState::Connected)
//!                             └──► LocalBackend   (otherwise)
//! ```

mod fallback;
mod local;
mod remote;

use std::time::Duration;

use async_trait::async_trait;

use crate::CacheResult;
use crate::pattern::KeyPattern;

/// Longest expiry any backend accepts; longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub use fallback::FallbackStore;
pub use local::LocalBackend;
pub use remote::RedisBackend;

/// Connection state published by backends that can go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// A TTL-bounded byte store.
///
/// Implementations must be safe for concurrent use; every single-key
/// operation is atomic on its own. Multi-key operations (`flush`,
/// `delete_matching`) are not atomic as a whole.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short provider name, reported in stats and logs.
    fn name(&self) -> &'static str;

    /// Get the raw value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Remove `key`. Returns whether a live entry was removed.
    async fn del(&self, key: &str) -> CacheResult<bool>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remove every entry.
    async fn flush(&self) -> CacheResult<()>;

    /// Remove every entry whose key matches `pattern`, returning how many.
    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<usize>;

    /// Number of live entries.
    async fn key_count(&self) -> CacheResult<usize>;
}
