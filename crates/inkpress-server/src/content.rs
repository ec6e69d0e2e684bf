//! Content items and their routes.
//!
//! Reads are served through the response cache; every write clears the
//! content cache tiers before responding.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use dashmap::DashMap;
use inkpress_cache::CacheStore;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::http_cache::{
    CachePreset, HttpCache, InvalidationPattern, cache_response, invalidate_after,
    invalidate_cache, invalidate_content_cache,
};
use crate::middleware::CurrentUser;
use crate::server::AppState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub published: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewContent {
    #[serde(rename = "type", default = "default_content_type")]
    pub content_type: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

fn default_content_type() -> String {
    "article".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPatch {
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub content_type: Option<String>,
}

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// In-memory content store.
#[derive(Debug, Default)]
pub struct ContentRepository {
    items: DashMap<String, ContentItem>,
    reads: AtomicUsize,
}

impl ContentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reads that reached the repository.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Published items, oldest first.
    pub fn list_published(&self, content_type: Option<&str>) -> Vec<ContentItem> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut items: Vec<ContentItem> = self
            .items
            .iter()
            .filter(|item| item.published)
            .filter(|item| content_type.is_none_or(|t| item.content_type == t))
            .map(|item| item.value().clone())
            .collect();
        items.sort_by(|a, b| (&a.created_at, &a.id).cmp(&(&b.created_at, &b.id)));
        items
    }

    pub fn get(&self, id: &str) -> Option<ContentItem> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.items.get(id).map(|item| item.value().clone())
    }

    pub fn create(&self, new: NewContent, author: Option<String>) -> ContentItem {
        let timestamp = now();
        let item = ContentItem {
            id: Uuid::new_v4().to_string(),
            content_type: new.content_type,
            title: new.title,
            body: new.body,
            author,
            published: false,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };
        self.items.insert(item.id.clone(), item.clone());
        item
    }

    pub fn update(&self, id: &str, patch: ContentPatch) -> Option<ContentItem> {
        let mut item = self.items.get_mut(id)?;
        if let Some(content_type) = patch.content_type {
            item.content_type = content_type;
        }
        if let Some(title) = patch.title {
            item.title = title;
        }
        if let Some(body) = patch.body {
            item.body = body;
        }
        item.updated_at = now();
        Some(item.clone())
    }

    pub fn publish(&self, id: &str) -> Option<ContentItem> {
        let mut item = self.items.get_mut(id)?;
        item.published = true;
        item.updated_at = now();
        Some(item.clone())
    }

    pub fn delete(&self, id: &str) -> Option<ContentItem> {
        self.items.remove(id).map(|(_, item)| item)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("content {0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

fn envelope<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

pub async fn list_content(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Value> {
    envelope(state.content.list_published(query.content_type.as_deref()))
}

pub async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .content
        .get(&id)
        .filter(|item| item.published)
        .map(envelope)
        .ok_or(ApiError::NotFound(id))
}

/// The author's view of an item, published or not.
pub async fn get_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
    user: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    state
        .content
        .get(&id)
        .filter(|item| item.author.as_deref() == Some(user.id.as_str()))
        .map(envelope)
        .ok_or(ApiError::NotFound(id))
}

pub async fn create_content(
    State(state): State<AppState>,
    user: Result<CurrentUser, StatusCode>,
    Json(new): Json<NewContent>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if new.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }

    let item = state.content.create(new, user.ok().map(|u| u.id));
    invalidate_content_cache(&state.cache, &item.id).await;
    Ok((StatusCode::CREATED, envelope(item)))
}

pub async fn update_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ContentPatch>,
) -> Result<Json<Value>, ApiError> {
    let item = state
        .content
        .update(&id, patch)
        .ok_or(ApiError::NotFound(id))?;
    invalidate_content_cache(&state.cache, &item.id).await;
    Ok(envelope(item))
}

pub async fn delete_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let item = state.content.delete(&id).ok_or(ApiError::NotFound(id))?;
    invalidate_content_cache(&state.cache, &item.id).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn publish_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let item = state
        .content
        .publish(&id)
        .ok_or(ApiError::NotFound(id))?;
    invalidate_content_cache(&state.cache, &item.id).await;
    Ok(envelope(item))
}

/// Content routes with their cache and invalidation layers.
pub fn routes(store: Arc<CacheStore>) -> Router<AppState> {
    let public = HttpCache::preset(store.clone(), CachePreset::Public);
    let item = HttpCache::preset(store.clone(), CachePreset::Content);
    let draft = HttpCache::preset(store.clone(), CachePreset::User);
    // Author drafts are cached per user, outside the content tiers
    let drafts = invalidate_cache(
        store,
        [InvalidationPattern::dynamic(|ctx| {
            format!("user:/content/{}/draft*", ctx.param("id"))
        })],
    );

    Router::new()
        .route(
            "/content",
            get(list_content)
                .route_layer(from_fn_with_state(public, cache_response))
                .post(create_content),
        )
        .route(
            "/content/{id}",
            get(get_content)
                .route_layer(from_fn_with_state(item, cache_response))
                .merge(
                    put(update_content)
                        .delete(delete_content)
                        .route_layer(from_fn_with_state(drafts.clone(), invalidate_after)),
                ),
        )
        .route(
            "/content/{id}/draft",
            get(get_draft).route_layer(from_fn_with_state(draft, cache_response)),
        )
        .route(
            "/content/{id}/publish",
            post(publish_content).route_layer(from_fn_with_state(drafts, invalidate_after)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new(title: &str, content_type: &str) -> NewContent {
        NewContent {
            content_type: content_type.into(),
            title: title.into(),
            body: String::new(),
        }
    }

    #[test]
    fn test_only_published_items_are_listed() {
        let repo = ContentRepository::new();
        let draft = repo.create(new("Draft", "article"), None);
        let live = repo.create(new("Live", "article"), None);
        repo.publish(&live.id);

        let listed = repo.list_published(None);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, live.id);
        assert!(repo.get(&draft.id).is_some());
    }

    #[test]
    fn test_list_filters_by_type() {
        let repo = ContentRepository::new();
        for (title, kind) in [("A", "article"), ("B", "page"), ("C", "article")] {
            let item = repo.create(new(title, kind), None);
            repo.publish(&item.id);
        }

        assert_eq!(repo.list_published(Some("article")).len(), 2);
        assert_eq!(repo.list_published(Some("page")).len(), 1);
        assert_eq!(repo.list_published(Some("video")).len(), 0);
        assert_eq!(repo.list_published(None).len(), 3);
    }

    #[test]
    fn test_update_and_delete() {
        let repo = ContentRepository::new();
        let item = repo.create(new("Old", "article"), Some("ada".into()));

        let updated = repo
            .update(
                &item.id,
                ContentPatch {
                    title: Some("New".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "New");
        assert_eq!(updated.author.as_deref(), Some("ada"));

        assert!(repo.delete(&item.id).is_some());
        assert!(repo.delete(&item.id).is_none());
        assert!(repo.update(&item.id, ContentPatch::default()).is_none());
        assert!(repo.publish(&item.id).is_none());
    }

    #[test]
    fn test_reads_are_counted() {
        let repo = ContentRepository::new();
        repo.list_published(None);
        repo.get("missing");
        assert_eq!(repo.reads(), 2);
    }

    #[test]
    fn test_item_serializes_type_field() {
        let repo = ContentRepository::new();
        let item = repo.create(new("Hello", "page"), None);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "page");
        assert_eq!(value["published"], false);
        assert!(value.get("createdAt").is_some());
    }
}
