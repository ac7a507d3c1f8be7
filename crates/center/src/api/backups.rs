//! Snapshot management: list, create, two-phase restore, download.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;

use mfasrv_domain::model::AuditEvent;
use mfasrv_store::backup_path;

use super::guard::AdminGuard;
use super::{api_error, map_error};
use crate::state::AppState;

pub async fn list(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    match state.snapshotter.list() {
        Ok(backups) => Json(backups).into_response(),
        Err(e) => map_error(e),
    }
}

pub async fn create(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    match state.snapshotter.snapshot().await {
        Ok(file_name) => {
            let _ = state.store.append_audit(
                &AuditEvent::new("backup_created", true).details(file_name.clone()),
                Utc::now(),
            );
            (
                StatusCode::CREATED,
                Json(serde_json::json!({ "file_name": file_name })),
            )
                .into_response()
        }
        Err(e) => map_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub file_name: String,
}

/// Phase one: returns the single-use confirmation token.
pub async fn request_restore(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<RestoreRequest>,
) -> Response {
    match state.snapshotter.request_restore(&body.file_name, Utc::now()) {
        Ok(token) => Json(serde_json::json!({
            "confirm_token": token,
            "expires_in_secs": 300,
        }))
        .into_response(),
        Err(e) => map_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RestoreConfirm {
    pub confirm_token: String,
}

/// Phase two: executes the replacement.
pub async fn confirm_restore(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<RestoreConfirm>,
) -> Response {
    match state
        .snapshotter
        .confirm_restore(&body.confirm_token, Utc::now())
        .await
    {
        Ok(file_name) => {
            let _ = state.store.append_audit(
                &AuditEvent::new("backup_restored", true).details(file_name.clone()),
                Utc::now(),
            );
            Json(serde_json::json!({ "restored_from": file_name })).into_response()
        }
        Err(e) => map_error(e),
    }
}

pub async fn download(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let path = match backup_path(state.snapshotter.backup_root(), &name) {
        Ok(path) => path,
        Err(e) => return map_error(e),
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{name}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            api_error(StatusCode::NOT_FOUND, "backup not found")
        }
        Err(e) => map_error(e.into()),
    }
}
