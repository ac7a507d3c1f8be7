//! Enrollment lifecycle endpoints. The plaintext secret never appears in a
//! response — only provisioning material (URI, instructions).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use mfasrv_domain::model::{Enrollment, EnrollmentStatus};

use super::guard::AdminGuard;
use super::{api_error, map_error, Page, PageQuery};
use crate::state::AppState;

/// Public projection of an enrollment row: the sealed secret stays out.
#[derive(Debug, Serialize)]
pub struct EnrollmentView {
    pub id: String,
    pub user_id: String,
    pub method: String,
    pub status: EnrollmentStatus,
    pub device_identifier: Option<String>,
    pub friendly_name: Option<String>,
    pub created: chrono::DateTime<chrono::Utc>,
    pub activated: Option<chrono::DateTime<chrono::Utc>>,
    pub last_used: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Enrollment> for EnrollmentView {
    fn from(e: Enrollment) -> Self {
        Self {
            id: e.id,
            user_id: e.user_id,
            method: e.method,
            status: e.status,
            device_identifier: e.device_identifier,
            friendly_name: e.friendly_name,
            created: e.created,
            activated: e.activated,
            last_used: e.last_used,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEnrollment {
    pub user_id: String,
    pub method: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub device_identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateBody {
    pub proof: String,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateBody {
    /// `disabled` or `revoked`.
    pub status: EnrollmentStatus,
}

pub async fn list(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.store.list_enrollments(query.page, query.page_size) {
        Ok((total, data)) => Page::response(
            total,
            &query,
            data.into_iter().map(EnrollmentView::from).collect(),
        ),
        Err(e) => map_error(e),
    }
}

pub async fn get_one(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_enrollment(&id) {
        Ok(Some(e)) => Json(EnrollmentView::from(e)).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "enrollment not found"),
        Err(e) => map_error(e),
    }
}

pub async fn create(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<CreateEnrollment>,
) -> Response {
    match state.enrollments.begin(
        &body.user_id,
        &body.method,
        body.friendly_name,
        body.device_identifier,
    ) {
        Ok(started) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "enrollment": EnrollmentView::from(started.enrollment),
                "provisioning_uri": started.provisioning_uri,
                "instructions": started.instructions,
            })),
        )
            .into_response(),
        Err(e) => map_error(e),
    }
}

pub async fn activate(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ActivateBody>,
) -> Response {
    match state.enrollments.activate(&id, &body.proof) {
        Ok(enrollment) => Json(EnrollmentView::from(enrollment)).into_response(),
        Err(e) => map_error(e),
    }
}

pub async fn deactivate(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DeactivateBody>,
) -> Response {
    match state.enrollments.deactivate(&id, body.status) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => map_error(e),
    }
}

pub async fn delete(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.enrollments.delete(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "enrollment not found"),
        Err(e) => map_error(e),
    }
}
