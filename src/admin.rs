//! The admin HTTP surface (spec.md §6 "Listener admin": "an HTTP mux with
//! read-only JSON telemetry" — out of scope beyond its contract with the
//! core). This module is the thin boundary glue that contract calls for:
//! a read-only `axum` router exposing health, Prometheus metrics, and a
//! small JSON stats summary, with nothing the handler or sequence engine
//! depends on.
//!
//! Grounded on the teacher's `http_server.rs` (`AppState`/`Router`/
//! `CorsLayer` shape, `health_check`/`prometheus_metrics`/`server_stats`
//! route set), trimmed to the read-only telemetry contract: no
//! `/config/reload` (live reload is out of scope per spec.md §1), no
//! cluster registry (clustering is never mentioned in spec.md).

use crate::cache::ShardedCache;
use crate::dns::Message;
use crate::metrics::Metrics;
use crate::rate_limiter::RateLimiter;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
    cache: Option<Arc<ShardedCache<Message>>>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/stats", get(stats))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
}

/// Runs the admin HTTP server until `shutdown_rx` fires. Read-only: it
/// never mutates cache, rate limiter, or registry state, matching
/// spec.md §6's "read-only JSON telemetry" contract.
pub async fn run(
    bind_addr: SocketAddr,
    metrics: Arc<Metrics>,
    cache: Option<Arc<ShardedCache<Message>>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> crate::error::Result<()> {
    let state = AppState { metrics, cache, rate_limiter };
    let app = router(state);
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "admin listener bound");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("admin listener shutting down");
        })
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    if let Some(cache) = &state.cache {
        state.metrics.cache_size.set(cache.len() as i64);
    }
    if let Some(limiter) = &state.rate_limiter {
        state.metrics.rate_limit_buckets.set(limiter.bucket_count() as i64);
    }
    match state.metrics.encode() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(axum::body::Body::from(body))
            .unwrap(),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(axum::body::Body::from(format!("failed to encode metrics: {e}")))
            .unwrap(),
    }
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let cache_size = state.cache.as_ref().map(|c| c.len()).unwrap_or(0);
    let rate_limit_buckets = state.rate_limiter.as_ref().map(|r| r.bucket_count()).unwrap_or(0);
    Json(json!({
        "cache": { "size": cache_size },
        "rate_limiter": { "active_buckets": rate_limit_buckets },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_returns_ok() {
        let state = AppState { metrics: Arc::new(Metrics::new().unwrap()), cache: None, rate_limiter: None };
        let app = router(state);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let state = AppState { metrics: Arc::new(Metrics::new().unwrap()), cache: None, rate_limiter: None };
        let app = router(state);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/metrics").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
