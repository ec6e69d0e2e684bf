//! Response caching middleware.
//!
//! `cache_response` wraps a GET route: on a hit the stored response is
//! replayed without calling the handler, on a miss the handler's response is
//! captured and stored in the background. Every response that passes through
//! carries `X-Cache` and `X-Cache-Key` markers.
//!
//! ```ignore
//! let cache = HttpCache::preset(store.clone(), CachePreset::Public);
//! Router::new().route(
//!     "/content",
//!     get(list_content).route_layer(from_fn_with_state(cache, cache_response)),
//! );
//! ```

pub mod invalidation;
pub mod key;
pub mod presets;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes, HttpBody, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::stream;
use inkpress_cache::CacheStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::config::HttpCacheConfig;
use crate::metrics::{record_http_cache, record_http_cache_store};

pub use invalidation::{
    CONTENT_PATTERNS, InvalidationContext, InvalidationPattern, Invalidator, invalidate_after,
    invalidate_cache, invalidate_content_cache, invalidate_patterns,
};
pub use key::{RequestInfo, VaryBy, generate_default_key};
pub use presets::CachePreset;

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_KEY: &str = "x-cache-key";

const HIT: &str = "HIT";
const MISS: &str = "MISS";

/// Response headers that are never replayed from the cache.
const UNCACHED_HEADERS: &[&str] = &[
    "content-length",
    "set-cookie",
    "x-request-id",
    X_CACHE,
    X_CACHE_KEY,
];

/// A custom key generator refused to produce a key.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cache key generation failed: {0}")]
pub struct KeyError(pub String);

pub type KeyGenerator = Arc<dyn Fn(&RequestInfo) -> Result<String, KeyError> + Send + Sync>;
pub type CachePredicate = Arc<dyn Fn(&RequestInfo, StatusCode, &Value) -> bool + Send + Sync>;

/// Per-route caching behaviour.
#[derive(Clone)]
pub struct CacheOptions {
    pub ttl_secs: u64,
    pub namespace: String,
    pub key_generator: Option<KeyGenerator>,
    pub should_cache: CachePredicate,
    pub vary_by: Vec<VaryBy>,
    pub max_body_bytes: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        let defaults = HttpCacheConfig::default();
        Self {
            ttl_secs: defaults.default_ttl_secs,
            namespace: defaults.namespace,
            key_generator: None,
            should_cache: Arc::new(|_, status, _| status.is_success()),
            vary_by: VaryBy::defaults(),
            max_body_bytes: defaults.max_body_bytes,
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("ttl_secs", &self.ttl_secs)
            .field("namespace", &self.namespace)
            .field("key_generator", &self.key_generator.is_some())
            .field("vary_by", &self.vary_by)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl CacheOptions {
    pub fn from_config(config: &HttpCacheConfig) -> Self {
        Self {
            ttl_secs: config.default_ttl_secs,
            namespace: config.namespace.clone(),
            max_body_bytes: config.max_body_bytes,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_vary_by(mut self, vary_by: Vec<VaryBy>) -> Self {
        self.vary_by = vary_by;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&RequestInfo) -> Result<String, KeyError> + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    pub fn with_should_cache<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestInfo, StatusCode, &Value) -> bool + Send + Sync + 'static,
    {
        self.should_cache = Arc::new(predicate);
        self
    }

    /// Cache key for a request, from the custom generator if one is set.
    pub fn key_for(&self, req: &RequestInfo) -> Result<String, KeyError> {
        match &self.key_generator {
            Some(generator) => generator(req),
            None => Ok(generate_default_key(&self.namespace, &self.vary_by, req)),
        }
    }

    fn varies_by_body(&self) -> bool {
        self.vary_by.contains(&VaryBy::Body)
    }
}

/// State for `cache_response`: the shared store plus one route's options.
#[derive(Clone)]
pub struct HttpCache {
    store: Arc<CacheStore>,
    options: Arc<CacheOptions>,
}

impl HttpCache {
    pub fn new(store: Arc<CacheStore>, options: CacheOptions) -> Self {
        Self {
            store,
            options: Arc::new(options),
        }
    }

    pub fn preset(store: Arc<CacheStore>, preset: CachePreset) -> Self {
        Self::new(store, preset.options())
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }
}

/// The value stored for a cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedHttpResponse {
    pub status: u16,
    pub data: Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub timestamp: String,
}

impl CachedHttpResponse {
    pub fn new(status: StatusCode, data: Value, headers: &HeaderMap) -> Self {
        let headers = headers
            .iter()
            .filter(|(name, _)| !UNCACHED_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            status: status.as_u16(),
            data,
            headers,
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        }
    }
}

impl IntoResponse for CachedHttpResponse {
    fn into_response(self) -> Response {
        let body = match serde_json::to_vec(&self.data) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode cached response body");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        headers
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));

        response
    }
}

fn mark(response: &mut Response, status: &'static str, key: &str) {
    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(status));
    // Keys built from raw header values can contain bytes that are not legal here
    if let Ok(value) = HeaderValue::from_str(key) {
        headers.insert(X_CACHE_KEY, value);
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("application/json") || ct.contains("+json")
        })
}

/// Whether a body is known to be at most `max` bytes.
fn fits_within(body: &Body, max: usize) -> bool {
    body.size_hint().upper().is_some_and(|upper| upper <= max as u64)
}

/// A body that fails with `error` once read, in place of a stream that
/// already failed while being buffered.
fn failed_body(error: axum::Error) -> Body {
    Body::from_stream(stream::once(async move { Err::<Bytes, _>(error) }))
}

/// Response caching middleware, applied with `from_fn_with_state`.
pub async fn cache_response(State(cache): State<HttpCache>, req: Request, next: Next) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let options = cache.options.clone();
    let (parts, body) = req.into_parts();

    let (body, json_body) = if options.varies_by_body() {
        if !fits_within(&body, options.max_body_bytes) {
            tracing::debug!(uri = %parts.uri, "request body too large to key, skipping response cache");
            return next.run(Request::from_parts(parts, body)).await;
        }
        match to_bytes(body, options.max_body_bytes).await {
            Ok(bytes) => {
                let json = serde_json::from_slice::<Value>(&bytes).ok();
                (Body::from(bytes), json)
            }
            Err(e) => {
                tracing::debug!(error = %e, "request body unreadable, skipping response cache");
                return next.run(Request::from_parts(parts, failed_body(e))).await;
            }
        }
    } else {
        (body, None)
    };

    let info = RequestInfo::from_parts(&parts, json_body);
    let req = Request::from_parts(parts, body);

    let key = match options.key_for(&info) {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(error = %e, uri = %info.uri, "skipping response cache");
            return next.run(req).await;
        }
    };

    if let Some(cached) = cache.store.get::<CachedHttpResponse>(&key).await {
        tracing::debug!(key = %key, "response cache hit");
        record_http_cache(HIT, &options.namespace);
        let mut response = cached.into_response();
        mark(&mut response, HIT, &key);
        return response;
    }

    let response = next.run(req).await;
    record_http_cache(MISS, &options.namespace);

    let mut response = capture(&cache, &options, &info, key.clone(), response).await;
    mark(&mut response, MISS, &key);
    response
}

/// Buffer a cacheable response, schedule its store, and hand back an
/// equivalent response.
async fn capture(
    cache: &HttpCache,
    options: &CacheOptions,
    info: &RequestInfo,
    key: String,
    response: Response,
) -> Response {
    if !is_json(response.headers()) {
        return response;
    }

    let (parts, body) = response.into_parts();
    if !fits_within(&body, options.max_body_bytes) {
        tracing::debug!(key = %key, "response body too large to cache");
        return Response::from_parts(parts, body);
    }

    let bytes: Bytes = match to_bytes(body, options.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, key = %key, "failed to buffer response body");
            return Response::from_parts(parts, failed_body(e));
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(data) if (options.should_cache)(info, parts.status, &data) => {
            let entry = CachedHttpResponse::new(parts.status, data, &parts.headers);
            let store = cache.store.clone();
            let ttl = options.ttl_secs;
            // Delivery never waits on the store
            tokio::spawn(async move {
                let stored = store.set(&key, &entry, ttl).await;
                if !stored {
                    tracing::warn!(key = %key, "failed to store cached response");
                }
                record_http_cache_store(stored);
            });
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, key = %key, "response body is not valid JSON"),
    }

    Response::from_parts(parts, Body::from(bytes))
}
