//! Operator endpoints for inspecting and clearing the cache.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use inkpress_cache::CacheStats;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct PutKey {
    pub value: Value,
    pub ttl: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PatternQuery {
    pub pattern: Option<String>,
}

pub async fn stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

pub async fn get_key(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.cache.get::<Value>(&key).await {
        Some(value) => Json(json!({ "key": key, "value": value })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("key {key} not found") })),
        )
            .into_response(),
    }
}

pub async fn put_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<PutKey>,
) -> Response {
    let ttl = body.ttl.unwrap_or(state.default_ttl_secs);
    if state.cache.set(&key, &body.value, ttl).await {
        (StatusCode::OK, Json(json!({ "key": key, "ttl": ttl }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "cache write failed" })),
        )
            .into_response()
    }
}

pub async fn delete_key(State(state): State<AppState>, Path(key): Path<String>) -> StatusCode {
    if state.cache.del(&key).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn delete_matching(
    State(state): State<AppState>,
    Query(query): Query<PatternQuery>,
) -> Response {
    let Some(pattern) = query.pattern.filter(|p| !p.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "pattern query parameter is required" })),
        )
            .into_response();
    };

    let removed = state.cache.invalidate_pattern(&pattern).await;
    tracing::info!(pattern = %pattern, removed, "admin pattern invalidation");
    Json(json!({ "pattern": pattern, "removed": removed })).into_response()
}

pub async fn flush(State(state): State<AppState>) -> Response {
    if state.cache.flush().await {
        tracing::warn!("cache flushed by admin request");
        Json(json!({ "flushed": true })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "flushed": false })),
        )
            .into_response()
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/cache/stats", get(stats))
        .route("/admin/cache/keys", delete(delete_matching))
        .route(
            "/admin/cache/keys/{key}",
            get(get_key).put(put_key).delete(delete_key),
        )
        .route("/admin/cache/flush", post(flush))
}
