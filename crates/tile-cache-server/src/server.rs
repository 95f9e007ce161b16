//! HTTP server for tile cache endpoints
//!
//! Provides /health, /metrics, /cleanup and /tiles/{key} endpoints. Tile keys
//! may contain slashes (`z/x/y`).

use crate::types::HealthResponse;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tile_cache::{CacheManager, CleanupReport, MetricsSnapshot};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: CacheManager,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: CacheManager) -> Self {
        Self {
            cache,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/cleanup", post(cleanup))
        .route("/tiles/{*key}", get(get_tile).put(put_tile))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server, returning once `shutdown` resolves
pub async fn start_server(
    state: SharedState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        entries: state.cache.entry_count().await,
        cache: state.cache.metrics().await,
    })
}

async fn metrics(State(state): State<SharedState>) -> Json<MetricsSnapshot> {
    Json(state.cache.metrics().await)
}

/// Get a cached tile by key
async fn get_tile(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    match state.cache.get::<serde_json::Value>(&key).await {
        Some(tile) => ([("X-Cache", "HIT")], Json(tile)).into_response(),
        None => {
            debug!(key = %key, "Tile not cached");
            (
                [("X-Cache", "MISS")],
                error_response(StatusCode::NOT_FOUND, "Tile not cached"),
            )
                .into_response()
        }
    }
}

/// Store a tile under `key`
async fn put_tile(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Json(tile): Json<serde_json::Value>,
) -> Response {
    if state.cache.set(&key, &tile).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        warn!(key = %key, "Failed to cache tile");
        error_response(StatusCode::SERVICE_UNAVAILABLE, "Tile could not be cached")
    }
}

/// Run a cleanup sweep immediately
async fn cleanup(State(state): State<SharedState>) -> Response {
    match state.cache.perform_cleanup().await {
        Some(report) => (
            [(header::CACHE_CONTROL, "no-store")],
            Json::<CleanupReport>(report),
        )
            .into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "Cleanup failed"),
    }
}
