//! End-to-end response caching through a running server.

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, middleware::from_fn_with_state, routing::get};
use inkpress_cache::{CacheStore, RedisBackend, RedisConfig};
use inkpress_server::content::NewContent;
use inkpress_server::http_cache::presets;
use inkpress_server::{AppConfig, AppState, CacheOptions, HttpCache, VaryBy, build_app, cache_response};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    state: AppState,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

async fn serve(app: Router) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, handle)
}

async fn start_server(cache: Arc<CacheStore>) -> TestServer {
    let cfg = AppConfig::default();
    let state = AppState::new(&cfg, cache);
    let (base, shutdown, handle) = serve(build_app(&cfg, state.clone())).await;
    TestServer {
        base,
        state,
        shutdown,
        handle,
    }
}

fn published(state: &AppState, title: &str) -> String {
    let item = state.content.create(
        NewContent {
            content_type: "article".into(),
            title: title.into(),
            body: "body".into(),
        },
        Some("ada".into()),
    );
    state.content.publish(&item.id);
    item.id
}

/// Responses are stored by a background task; wait for it to land.
async fn wait_for_key(store: &CacheStore, key: &str) {
    for _ in 0..100 {
        if store.exists(key).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("response for {key} was never cached");
}

fn cache_status(resp: &reqwest::Response) -> &str {
    resp.headers()
        .get("x-cache")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[tokio::test]
async fn content_list_is_cached_and_invalidated_by_writes() {
    let server = start_server(Arc::new(CacheStore::new_local())).await;
    let client = reqwest::Client::new();
    published(&server.state, "First");
    let url = format!("{}/content?x=1", server.base);

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(cache_status(&resp), "MISS");
    assert_eq!(resp.headers()["x-cache-key"], "public:/content?x=1:GET");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(server.state.content.reads(), 1);

    wait_for_key(&server.state.cache, "public:/content?x=1:GET").await;

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(cache_status(&resp), "HIT");
    let cached: Value = resp.json().await.unwrap();
    assert_eq!(cached, body);
    assert_eq!(server.state.content.reads(), 1, "handler ran on a hit");

    // A write clears the content tiers
    let resp = client
        .post(format!("{}/content", server.base))
        .json(&json!({ "title": "Second" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert!(resp.headers().get("x-cache").is_none());

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(cache_status(&resp), "MISS");
    assert_eq!(server.state.content.reads(), 2);

    server.stop().await;
}

#[tokio::test]
async fn content_item_caches_only_successful_reads() {
    let server = start_server(Arc::new(CacheStore::new_local())).await;
    let client = reqwest::Client::new();
    let id = published(&server.state, "Hello");
    let key = format!("content:/content/{id}:GET:anonymous");

    let resp = client
        .get(format!("{}/content/{id}", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(cache_status(&resp), "MISS");
    assert_eq!(resp.headers()["x-cache-key"], key.as_str());
    wait_for_key(&server.state.cache, &key).await;

    let resp = client
        .get(format!("{}/content/{id}", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(cache_status(&resp), "HIT");

    // 404s are never stored
    for _ in 0..2 {
        let resp = client
            .get(format!("{}/content/missing", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        assert_eq!(cache_status(&resp), "MISS");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !server
            .state
            .cache
            .exists("content:/content/missing:GET:anonymous")
            .await
    );

    // Deleting clears the cached item
    let resp = client
        .delete(format!("{}/content/{id}", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    assert!(!server.state.cache.exists(&key).await);

    server.stop().await;
}

#[tokio::test]
async fn drafts_are_cached_per_user_and_cleared_on_update() {
    let server = start_server(Arc::new(CacheStore::new_local())).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/content", server.base))
        .header("x-user-id", "ada")
        .json(&json!({ "title": "Notes", "type": "page" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    let id = created["data"]["id"].as_str().unwrap().to_string();
    let draft_url = format!("{}/content/{id}/draft", server.base);
    let key = format!("user:/content/{id}/draft:GET:ada");

    // Anonymous callers cannot read drafts
    let resp = client.get(&draft_url).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(&draft_url)
        .header("x-user-id", "ada")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-cache-key"], key.as_str());
    wait_for_key(&server.state.cache, &key).await;

    let resp = client
        .get(&draft_url)
        .header("x-user-id", "ada")
        .send()
        .await
        .unwrap();
    assert_eq!(cache_status(&resp), "HIT");

    // Another user gets their own key and no access
    let resp = client
        .get(&draft_url)
        .header("x-user-id", "bob")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(cache_status(&resp), "MISS");

    let resp = client
        .put(format!("{}/content/{id}", server.base))
        .header("x-user-id", "ada")
        .json(&json!({ "title": "Revised" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(!server.state.cache.exists(&key).await);

    let resp = client
        .get(&draft_url)
        .header("x-user-id", "ada")
        .send()
        .await
        .unwrap();
    assert_eq!(cache_status(&resp), "MISS");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["title"], "Revised");

    server.stop().await;
}

#[tokio::test]
async fn requests_succeed_when_the_cache_is_down() {
    let config = RedisConfig {
        url: Some("redis://127.0.0.1:1".to_string()),
        timeout_ms: 200,
        ..Default::default()
    };
    let backend = RedisBackend::from_config("redis://127.0.0.1:1", &config).expect("pool");
    let server = start_server(Arc::new(CacheStore::new(Arc::new(backend)))).await;
    let client = reqwest::Client::new();
    published(&server.state, "Still here");

    for _ in 0..2 {
        let resp = client
            .get(format!("{}/content", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(cache_status(&resp), "MISS");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"][0]["title"], "Still here");
    }

    let resp = client
        .post(format!("{}/content", server.base))
        .json(&json!({ "title": "Written anyway" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert_eq!(server.state.content.reads(), 2);

    server.stop().await;
}

#[tokio::test]
async fn query_dimension_ignores_parameter_order() {
    let store = Arc::new(CacheStore::new_local());
    let options = CacheOptions::default()
        .with_namespace("search")
        .with_vary_by(vec![VaryBy::Method, VaryBy::Query]);
    let app = Router::new().route(
        "/search",
        get(|| async { Json(json!({ "success": true, "data": [] })) })
            .route_layer(from_fn_with_state(HttpCache::new(store.clone(), options), cache_response)),
    );
    let (base, shutdown, handle) = serve(app).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/search?b=2&a=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(cache_status(&resp), "MISS");
    assert_eq!(resp.headers()["x-cache-key"], "search:GET:a=1&b=2");
    wait_for_key(&store, "search:GET:a=1&b=2").await;

    let resp = client
        .get(format!("{base}/search?a=1&b=2"))
        .send()
        .await
        .unwrap();
    assert_eq!(cache_status(&resp), "HIT");

    let _ = shutdown.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn user_preset_never_stores_credentials() {
    let store = Arc::new(CacheStore::new_local());
    let app = Router::new()
        .route(
            "/session",
            get(|| async { Json(json!({ "success": true, "data": { "token": "abc" } })) })
                .route_layer(from_fn_with_state(
                    HttpCache::new(store.clone(), presets::user()),
                    cache_response,
                )),
        )
        .layer(axum::middleware::from_fn(
            inkpress_server::middleware::identify_user,
        ));
    let (base, shutdown, handle) = serve(app).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let resp = client
            .get(format!("{base}/session"))
            .header("x-user-id", "ada")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(cache_status(&resp), "MISS");
        assert_eq!(resp.headers()["x-cache-key"], "user:/session:GET:ada");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!store.exists("user:/session:GET:ada").await);

    let _ = shutdown.send(());
    let _ = handle.await;
}
