use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use inkpress_cache::CacheStore;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{
    admin, config::AppConfig, content, content::ContentRepository, handlers,
    middleware as app_middleware,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheStore>,
    pub content: Arc<ContentRepository>,
    /// TTL for admin writes that do not name one
    pub default_ttl_secs: u64,
}

impl AppState {
    pub fn new(cfg: &AppConfig, cache: Arc<CacheStore>) -> Self {
        Self {
            cache,
            content: Arc::new(ContentRepository::new()),
            default_ttl_secs: cfg.http_cache.default_ttl_secs,
        }
    }
}

pub struct InkpressServer {
    addr: SocketAddr,
    app: Router,
    cache: Arc<CacheStore>,
}

pub fn build_app(cfg: &AppConfig, state: AppState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        .merge(content::routes(state.cache.clone()))
        .merge(admin::routes())
        .with_state(state)
        // Middleware stack (order: user -> request id/metrics -> compression/cors/trace -> body limit)
        .layer(middleware::from_fn(app_middleware::identify_user))
        .layer(middleware::from_fn(app_middleware::track_metrics))
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = tracing::field::Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    cache: Option<Arc<CacheStore>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            cache: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn with_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> InkpressServer {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(CacheStore::new_local()));
        let app = build_app(&self.config, AppState::new(&self.config, cache.clone()));

        InkpressServer {
            addr: self.addr,
            app,
            cache,
        }
    }
}

impl InkpressServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.cache.close();
        tracing::info!("cache closed");
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
