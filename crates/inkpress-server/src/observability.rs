//! Log subscriber setup.
//!
//! The level comes from `logging.level` in the loaded configuration and is
//! applied when the subscriber is installed. `RUST_LOG`, when set and
//! parseable, replaces it entirely.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Filter for the given level, or for `rust_log` when that parses.
pub fn build_filter(level: &str, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level.to_ascii_lowercase()))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(logging: &LoggingConfig) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(&logging.level, rust_log.as_deref());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_configured_level_is_applied() {
        assert_eq!(
            build_filter("debug", None).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            build_filter("WARN", None).max_level_hint(),
            Some(LevelFilter::WARN)
        );
    }

    #[test]
    fn test_rust_log_overrides_configured_level() {
        assert_eq!(
            build_filter("info", Some("trace")).max_level_hint(),
            Some(LevelFilter::TRACE)
        );
    }
}
