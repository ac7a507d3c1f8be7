//! Users are read-only here — the directory importer owns their content.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use super::enrollments::EnrollmentView;
use super::guard::AdminGuard;
use super::{api_error, map_error, Page, PageQuery};
use crate::state::AppState;

pub async fn list(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.store.list_users(query.page, query.page_size) {
        Ok((total, data)) => Page::response(total, &query, data),
        Err(e) => map_error(e),
    }
}

pub async fn get_one(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_user(&id) {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "user not found"),
        Err(e) => map_error(e),
    }
}

pub async fn enrollments(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.enrollments_for_user(&id) {
        Ok(list) => Json(
            list.into_iter()
                .map(EnrollmentView::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => map_error(e),
    }
}
