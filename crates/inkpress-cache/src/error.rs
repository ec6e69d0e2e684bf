//! Error types for cache backends.
//!
//! Backends report failures through [`CacheError`]; [`crate::CacheStore`] never
//! lets one escape to its caller.

/// Errors that can occur inside a cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A Redis command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// No pooled connection could be obtained.
    #[error("Connection pool error: {message}")]
    Pool {
        /// Description of the pool failure.
        message: String,
    },

    /// A value could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend is known to be down.
    #[error("Backend unavailable: {backend}")]
    Unavailable {
        /// Name of the unavailable backend.
        backend: &'static str,
    },

    /// A backend call did not complete in time.
    #[error("Timed out during {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },
}

impl CacheError {
    /// Creates a new `Pool` error.
    #[must_use]
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            message: message.into(),
        }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(backend: &'static str) -> Self {
        Self::Unavailable { backend }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(operation: &'static str) -> Self {
        Self::Timeout { operation }
    }

    /// Returns `true` if the error means the backend connection is broken,
    /// as opposed to a problem with a single value.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            Self::Pool { .. } | Self::Unavailable { .. } | Self::Timeout { .. } => true,
            Self::Serialization(_) => false,
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::pool(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(CacheError::pool("timed out").is_connectivity());
        assert!(CacheError::unavailable("redis").is_connectivity());
        assert!(CacheError::timeout("get").is_connectivity());

        let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!CacheError::from(serde_err).is_connectivity());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            CacheError::unavailable("redis").to_string(),
            "Backend unavailable: redis"
        );
    }
}
