//! # inkpress-cache
//!
//! TTL key/value cache for the Inkpress server, with a shared Redis backend
//! and an in-process fallback.
//!
//! ## Architecture
//!
//! ```text
//! CacheStore (JSON, fail-open, stats)
//!   └── FallbackStore
//!         ├── RedisBackend  (primary while ConnectionState::Connected)
//!         └── LocalBackend  (DashMap; serves every call while Redis is down)
//! ```
//!
//! ## Graceful Degradation
//!
//! No [`CacheStore`] method returns an error. If Redis is unconfigured,
//! unreachable at startup, or drops later, calls go to the local backend;
//! a failing call degrades to a miss.
//!
//! ## Example
//!
//! ```ignore
//! use inkpress_cache::{CacheSettings, CacheStore};
//!
//! let store = CacheStore::connect(&CacheSettings::default()).await;
//! let posts: Vec<Post> = store
//!     .get_or_set("content:list", || repo.list_posts(), 300)
//!     .await?;
//! store.invalidate_pattern("content:*").await;
//! store.close();
//! ```

pub mod backend;
mod error;
pub mod pattern;
mod settings;
pub mod stats;
mod store;

pub use backend::{CacheBackend, ConnectionState, FallbackStore, LocalBackend, RedisBackend};
pub use error::CacheError;
pub use pattern::KeyPattern;
pub use settings::{CacheSettings, LocalConfig, RedisConfig};
pub use stats::{CacheStats, OperationCounts};
pub use store::CacheStore;

/// Type alias for a backend result.
pub type CacheResult<T> = Result<T, CacheError>;
