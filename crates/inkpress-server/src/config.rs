use inkpress_cache::CacheSettings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Cache backends (Redis + local)
    #[serde(default)]
    pub cache: CacheSettings,
    /// Response cache defaults for routes without a preset
    #[serde(default)]
    pub http_cache: HttpCacheConfig,
}

// Default derived via field defaults

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Cache validation
        if self.cache.redis.is_configured() && self.cache.redis.pool_size == 0 {
            return Err("cache.redis.pool_size must be > 0".into());
        }
        if self.cache.redis.is_configured() && self.cache.redis.timeout_ms == 0 {
            return Err("cache.redis.timeout_ms must be > 0".into());
        }
        if self.http_cache.default_ttl_secs == 0 {
            return Err("http_cache.default_ttl_secs must be > 0".into());
        }
        if self.http_cache.namespace.is_empty() {
            return Err("http_cache.namespace must not be empty".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCacheConfig {
    /// TTL in seconds for routes cached without a preset
    #[serde(default = "default_http_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Key namespace for routes cached without a preset
    #[serde(default = "default_http_cache_namespace")]
    pub namespace: String,

    /// Responses larger than this are delivered but never cached
    #[serde(default = "default_http_cache_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_http_cache_ttl_secs() -> u64 {
    300
}

fn default_http_cache_namespace() -> String {
    "http".to_string()
}

fn default_http_cache_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_http_cache_ttl_secs(),
            namespace: default_http_cache_namespace(),
            max_body_bytes: default_http_cache_max_body_bytes(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("inkpress.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., INKPRESS__CACHE__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("INKPRESS")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }
}
