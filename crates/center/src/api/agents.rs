//! Registered agent listing and deregistration.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::guard::AdminGuard;
use super::{api_error, map_error, Page, PageQuery};
use crate::state::AppState;

pub async fn list(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.store.list_agents(query.page, query.page_size) {
        Ok((total, data)) => Page::response(total, &query, data),
        Err(e) => map_error(e),
    }
}

pub async fn deregister(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    // A deregistered agent's certificate must stop authenticating.
    let serial = match state.store.agent_cert_serial(&id) {
        Ok(serial) => serial,
        Err(e) => return map_error(e),
    };
    match state.store.deregister_agent(&id) {
        Ok(true) => {
            if let Some(serial) = serial {
                if let Err(e) = state.ca.revoke(&serial, chrono::Utc::now()) {
                    tracing::warn!(agent_id = %id, error = %e, "certificate revocation failed");
                }
            }
            tracing::info!(agent_id = %id, "agent deregistered");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, "agent not found"),
        Err(e) => map_error(e),
    }
}
