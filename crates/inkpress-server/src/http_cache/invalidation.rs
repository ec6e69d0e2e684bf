//! Cache invalidation after successful writes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{RawPathParams, Request, State, rejection::RawPathParamsRejection},
    http::Method,
    middleware::Next,
    response::Response,
};
use futures_util::future::join_all;
use inkpress_cache::CacheStore;

use crate::metrics::record_invalidated_keys;

/// Patterns cleared whenever a content item is created, updated, deleted or
/// published.
pub const CONTENT_PATTERNS: [&str; 4] = [
    "content:*",
    "public:*content*",
    "short:*content*",
    "medium:*content*",
];

/// What a dynamic pattern can see of the request that triggered it.
#[derive(Debug, Clone)]
pub struct InvalidationContext {
    pub method: Method,
    pub path: String,
    pub params: HashMap<String, String>,
}

impl InvalidationContext {
    /// Path parameter by name, empty when the route has no such parameter.
    pub fn param(&self, name: &str) -> &str {
        self.params.get(name).map(String::as_str).unwrap_or_default()
    }
}

#[derive(Clone)]
pub enum InvalidationPattern {
    Static(String),
    Dynamic(Arc<dyn Fn(&InvalidationContext) -> String + Send + Sync>),
}

impl InvalidationPattern {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&InvalidationContext) -> String + Send + Sync + 'static,
    {
        InvalidationPattern::Dynamic(Arc::new(f))
    }

    pub fn resolve(&self, ctx: &InvalidationContext) -> String {
        match self {
            InvalidationPattern::Static(pattern) => pattern.clone(),
            InvalidationPattern::Dynamic(f) => f(ctx),
        }
    }
}

impl fmt::Debug for InvalidationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationPattern::Static(pattern) => f.debug_tuple("Static").field(pattern).finish(),
            InvalidationPattern::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<&str> for InvalidationPattern {
    fn from(pattern: &str) -> Self {
        InvalidationPattern::Static(pattern.to_string())
    }
}

impl From<String> for InvalidationPattern {
    fn from(pattern: String) -> Self {
        InvalidationPattern::Static(pattern)
    }
}

/// State for `invalidate_after`.
#[derive(Clone)]
pub struct Invalidator {
    store: Arc<CacheStore>,
    patterns: Arc<Vec<InvalidationPattern>>,
}

impl Invalidator {
    pub fn patterns(&self) -> &[InvalidationPattern] {
        &self.patterns
    }
}

/// Build the state for an invalidation layer:
///
/// ```ignore
/// let invalidator = invalidate_cache(store.clone(), ["content:*"]);
/// post(create).route_layer(from_fn_with_state(invalidator, invalidate_after))
/// ```
pub fn invalidate_cache<I, P>(store: Arc<CacheStore>, patterns: I) -> Invalidator
where
    I: IntoIterator<Item = P>,
    P: Into<InvalidationPattern>,
{
    Invalidator {
        store,
        patterns: Arc::new(patterns.into_iter().map(Into::into).collect()),
    }
}

/// Runs the handler, then clears the configured patterns if it succeeded.
/// Invalidation failures never change the response.
pub async fn invalidate_after(
    State(invalidator): State<Invalidator>,
    params: Result<RawPathParams, RawPathParamsRejection>,
    req: Request,
    next: Next,
) -> Response {
    let params = params
        .map(|params| {
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let ctx = InvalidationContext {
        method: req.method().clone(),
        path: req.uri().path().to_string(),
        params,
    };

    let response = next.run(req).await;
    if !response.status().is_success() {
        return response;
    }

    let patterns: Vec<String> = invalidator
        .patterns
        .iter()
        .map(|pattern| pattern.resolve(&ctx))
        .collect();
    let removed = invalidate_patterns(&invalidator.store, &patterns).await;
    tracing::debug!(
        method = %ctx.method,
        path = %ctx.path,
        removed,
        "invalidated cache after write"
    );

    response
}

/// Invalidate every pattern concurrently and return the total number of keys
/// removed.
pub async fn invalidate_patterns<S: AsRef<str>>(store: &CacheStore, patterns: &[S]) -> usize {
    let counts = join_all(
        patterns
            .iter()
            .map(|pattern| store.invalidate_pattern(pattern.as_ref())),
    )
    .await;

    let removed = counts.into_iter().sum();
    record_invalidated_keys(removed);
    removed
}

/// Clear every cache tier that may have served content.
pub async fn invalidate_content_cache(store: &CacheStore, content_id: &str) -> usize {
    let removed = invalidate_patterns(store, &CONTENT_PATTERNS).await;
    tracing::info!(content_id, removed, "invalidated content cache");
    removed
}
