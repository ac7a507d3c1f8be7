//! Session listing and revocation.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use mfasrv_domain::model::AuditEvent;

use super::guard::AdminGuard;
use super::{api_error, map_error, Page, PageQuery};
use crate::state::AppState;

pub async fn list(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.store.list_sessions(query.page, query.page_size) {
        Ok((total, data)) => Page::response(total, &query, data),
        Err(e) => map_error(e),
    }
}

pub async fn revoke(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.sessions.revoke(&id) {
        Ok(true) => {
            let _ = state.store.append_audit(
                &AuditEvent::new("session_revoked", true)
                    .details(format!("session {id} revoked by administrator")),
                Utc::now(),
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, "session not found or not active"),
        Err(e) => map_error(e),
    }
}
