pub mod admin;
pub mod config;
pub mod content;
pub mod handlers;
pub mod http_cache;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::{AppConfig, HttpCacheConfig, LoggingConfig, ServerConfig};
pub use content::{ContentItem, ContentRepository};
pub use http_cache::{
    CacheOptions, CachePreset, CachedHttpResponse, HttpCache, InvalidationPattern, VaryBy,
    cache_response, invalidate_after, invalidate_cache, invalidate_content_cache,
};
pub use observability::init_tracing;
pub use server::{AppState, InkpressServer, ServerBuilder, build_app};
