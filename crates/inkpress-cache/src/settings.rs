use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache configuration, embedded in the server's `[cache]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    /// Remote (Redis) backend. Left unconfigured, the cache is local-only.
    #[serde(default)]
    pub redis: RedisConfig,
    /// In-process backend.
    #[serde(default)]
    pub local: LocalConfig,
}

/// Redis connection configuration.
///
/// Supports two modes:
/// 1. URL mode: set `url` to a full connection string like `redis://:pass@host:6379/0`
/// 2. Separate options mode: set `host` (and optionally `port`, `password`)
///
/// If neither `url` nor `host` is set, Redis is not used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Full connection URL. Takes precedence over the separate options.
    #[serde(default)]
    pub url: Option<String>,

    /// Redis host
    #[serde(default)]
    pub host: Option<String>,

    /// Redis port (default: 6379)
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Redis password
    #[serde(default)]
    pub password: Option<String>,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix prepended to every key stored in Redis. When empty, `flush`
    /// clears the whole logical database.
    #[serde(default)]
    pub key_prefix: String,

    /// Seconds between health checks while Redis is up
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_health_check_interval_secs() -> u64 {
    5
}

impl RedisConfig {
    /// Returns `true` if either a URL or a host was supplied.
    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
            || self.host.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// Returns the connection URL, or `None` when Redis is not configured.
    /// If `url` is set, returns it directly; otherwise the URL is built from
    /// host, port and password.
    pub fn connection_url(&self) -> Option<String> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            return Some(url.to_string());
        }

        let host = self.host.as_deref().filter(|h| !h.is_empty())?;
        let auth = self
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();

        Some(format!("redis://{auth}{host}:{}", self.port))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: default_redis_port(),
            password: None,
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            key_prefix: String::new(),
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

/// In-process backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Maximum number of entries; 0 means unbounded
    #[serde(default = "default_local_max_entries")]
    pub max_entries: usize,

    /// Seconds between sweeps of expired entries; 0 disables the sweeper
    #[serde(default = "default_local_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_local_max_entries() -> usize {
    10_000
}

fn default_local_sweep_interval_secs() -> u64 {
    60
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_entries: default_local_max_entries(),
            sweep_interval_secs: default_local_sweep_interval_secs(),
        }
    }
}
