//! Liveness, readiness, and the Prometheus text endpoint. Unauthenticated
//! by design — they carry no tenant data.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::extract::State;
use chrono::Utc;

use crate::metrics;
use crate::state::AppState;

pub async fn health() -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

/// Ready means the store answers a trivial query.
pub async fn ready(State(state): State<AppState>) -> Response {
    match state.store.active_session_count(Utc::now()) {
        Ok(_) => Json(serde_json::json!({
            "status": "ready",
            "leader": state.is_leader.load(std::sync::atomic::Ordering::Acquire),
            "stream_subscribers": state.policy_hub.subscriber_count(),
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

pub async fn metrics() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
        .into_response()
}
