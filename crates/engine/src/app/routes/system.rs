use std::sync::Arc;

use axum::{Extension, Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

use rigger_infra::scheduler::health::resident_memory_bytes;

use crate::app::{AppState, dto, errors};

/// GET /health - store reachability plus per-queue counts
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> axum::response::Response {
    let timestamp = state.clock.now().to_rfc3339();

    if let Err(err) = state.store.ping().await {
        tracing::warn!(error = %err, "health check: store unreachable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "timestamp": timestamp,
                "error": err.to_string(),
            })),
        )
            .into_response();
    }

    match state.queues.all_counts().await {
        Ok(counts) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": timestamp,
                "queues": dto::counts_to_json(&counts),
            })),
        )
            .into_response(),
        Err(err) => errors::queue_error_to_response(err),
    }
}

/// GET /health/detailed - adds recent activity and process metrics
pub async fn health_detailed(Extension(state): Extension<Arc<AppState>>) -> axum::response::Response {
    let now = state.clock.now();

    let activity = match state.store.activity_since(now - chrono::Duration::hours(24)).await {
        Ok(activity) => activity,
        Err(err) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "timestamp": now.to_rfc3339(),
                    "error": err.to_string(),
                })),
            )
                .into_response();
        }
    };

    let counts = match state.queues.all_counts().await {
        Ok(counts) => counts,
        Err(err) => return errors::queue_error_to_response(err),
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": now.to_rfc3339(),
            "metrics": {
                "last_24h": activity,
                "queues": dto::counts_to_json(&counts),
                "system": {
                    "uptime_secs": state.started_at.elapsed().as_secs(),
                    "rss_bytes": resident_memory_bytes().await,
                },
            },
        })),
    )
        .into_response()
}

/// GET /api/stats - queue counts and uptime
pub async fn stats(Extension(state): Extension<Arc<AppState>>) -> axum::response::Response {
    match state.queues.all_counts().await {
        Ok(counts) => (
            StatusCode::OK,
            Json(json!({
                "queues": dto::counts_to_json(&counts),
                "uptime_secs": state.started_at.elapsed().as_secs(),
                "timestamp": state.clock.now().to_rfc3339(),
            })),
        )
            .into_response(),
        Err(err) => errors::queue_error_to_response(err),
    }
}
