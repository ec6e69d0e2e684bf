//! Named cache configurations for common route shapes.

use axum::http::StatusCode;
use serde_json::Value;

use super::{CacheOptions, VaryBy};

/// Field names that mark a body as unsafe for the user cache.
const SENSITIVE_FIELDS: &[&str] = &["password", "token"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePreset {
    Short,
    Medium,
    Long,
    Content,
    User,
    Public,
}

impl CachePreset {
    pub fn options(self) -> CacheOptions {
        match self {
            CachePreset::Short => short(),
            CachePreset::Medium => medium(),
            CachePreset::Long => long(),
            CachePreset::Content => content(),
            CachePreset::User => user(),
            CachePreset::Public => public(),
        }
    }

    pub fn namespace(self) -> &'static str {
        match self {
            CachePreset::Short => "short",
            CachePreset::Medium => "medium",
            CachePreset::Long => "long",
            CachePreset::Content => "content",
            CachePreset::User => "user",
            CachePreset::Public => "public",
        }
    }
}

/// 5 minutes.
pub fn short() -> CacheOptions {
    CacheOptions::default()
        .with_ttl(300)
        .with_namespace(CachePreset::Short.namespace())
}

/// 30 minutes.
pub fn medium() -> CacheOptions {
    CacheOptions::default()
        .with_ttl(1800)
        .with_namespace(CachePreset::Medium.namespace())
}

/// 1 hour.
pub fn long() -> CacheOptions {
    CacheOptions::default()
        .with_ttl(3600)
        .with_namespace(CachePreset::Long.namespace())
}

/// 15 minutes, only `200` responses whose envelope reports `success: true`.
pub fn content() -> CacheOptions {
    CacheOptions::default()
        .with_ttl(900)
        .with_namespace(CachePreset::Content.namespace())
        .with_should_cache(|_, status, body| status == StatusCode::OK && is_success_envelope(body))
}

/// 10 minutes, keyed per user. Bodies carrying credentials are never stored.
pub fn user() -> CacheOptions {
    CacheOptions::default()
        .with_ttl(600)
        .with_namespace(CachePreset::User.namespace())
        .with_vary_by(vec![VaryBy::Url, VaryBy::Method, VaryBy::User])
        .with_should_cache(|_, status, body| {
            status.is_success() && !contains_sensitive_field(body)
        })
}

/// 30 minutes, shared across users.
pub fn public() -> CacheOptions {
    CacheOptions::default()
        .with_ttl(1800)
        .with_namespace(CachePreset::Public.namespace())
        .with_vary_by(vec![VaryBy::Url, VaryBy::Method])
}

fn is_success_envelope(body: &Value) -> bool {
    body.get("success").and_then(Value::as_bool) == Some(true)
}

/// Whether any object in `body`, at any depth, has a `password` or `token`
/// field (case-insensitive).
pub fn contains_sensitive_field(body: &Value) -> bool {
    match body {
        Value::Object(map) => map.iter().any(|(name, value)| {
            SENSITIVE_FIELDS
                .iter()
                .any(|field| name.eq_ignore_ascii_case(field))
                || contains_sensitive_field(value)
        }),
        Value::Array(items) => items.iter().any(contains_sensitive_field),
        _ => false,
    }
}
