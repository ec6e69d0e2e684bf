use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{CacheBackend, ConnectionState};
use crate::pattern::KeyPattern;
use crate::{CacheError, CacheResult};

/// Composes a primary backend (usually Redis) with a secondary (local).
///
/// Single-key operations go to the primary while its published
/// [`ConnectionState`] is `Connected`, and to the secondary otherwise. The
/// choice is made per call, so an outage degrades to node-local caching
/// and recovery switches back without a restart.
///
/// `flush` and `delete_matching` always touch both backends, so nothing
/// written to the secondary during an outage survives a purge. A failure in
/// one backend does not stop the other from being tried.
pub struct FallbackStore {
    primary: Option<Arc<dyn CacheBackend>>,
    secondary: Arc<dyn CacheBackend>,
    primary_state: watch::Receiver<ConnectionState>,
}

impl FallbackStore {
    pub fn new(
        primary: Arc<dyn CacheBackend>,
        primary_state: watch::Receiver<ConnectionState>,
        secondary: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            primary: Some(primary),
            secondary,
            primary_state,
        }
    }

    /// A store with no primary; every call goes to `backend`.
    pub fn local_only(backend: Arc<dyn CacheBackend>) -> Self {
        let (_, primary_state) = watch::channel(ConnectionState::Disconnected);
        Self {
            primary: None,
            secondary: backend,
            primary_state,
        }
    }

    /// The backend that single-key operations use right now.
    pub fn active(&self) -> &Arc<dyn CacheBackend> {
        match &self.primary {
            Some(primary) if self.primary_state.borrow().is_connected() => primary,
            _ => &self.secondary,
        }
    }

    fn all(&self) -> impl Iterator<Item = &Arc<dyn CacheBackend>> {
        self.primary.iter().chain(std::iter::once(&self.secondary))
    }
}

#[async_trait]
impl CacheBackend for FallbackStore {
    fn name(&self) -> &'static str {
        self.active().name()
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.active().get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.active().set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        self.active().del(key).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.active().exists(key).await
    }

    async fn flush(&self) -> CacheResult<()> {
        let mut last_error: Option<CacheError> = None;
        let mut any_ok = false;

        for backend in self.all() {
            match backend.flush().await {
                Ok(()) => any_ok = true,
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "cache flush failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !any_ok => Err(e),
            _ => Ok(()),
        }
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> CacheResult<usize> {
        let mut deleted = 0;
        let mut last_error: Option<CacheError> = None;
        let mut any_ok = false;

        for backend in self.all() {
            match backend.delete_matching(pattern).await {
                Ok(n) => {
                    any_ok = true;
                    deleted += n;
                }
                Err(e) => {
                    tracing::warn!(
                        backend = backend.name(),
                        pattern = %pattern,
                        error = %e,
                        "cache pattern delete failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !any_ok => Err(e),
            _ => Ok(deleted),
        }
    }

    async fn key_count(&self) -> CacheResult<usize> {
        self.active().key_count().await
    }
}
