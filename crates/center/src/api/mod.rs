//! Administrative REST surface.
//!
//! Every route sits behind the [`guard::AdminGuard`] bearer check except
//! `/health`, `/ready`, and `/metrics`. Errors are JSON objects with an
//! `error` field plus optional structured detail; list endpoints share the
//! `{total, page, pageSize, data}` envelope.

pub mod agents;
pub mod audit;
pub mod backups;
pub mod enrollments;
pub mod guard;
pub mod health;
pub mod policies;
pub mod sessions;
pub mod users;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use mfasrv_domain::Error;

use crate::state::AppState;

/// Build the admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(health::metrics))
        .route("/v1/policies", get(policies::list).post(policies::create))
        .route(
            "/v1/policies/:id",
            get(policies::get_one)
                .put(policies::update)
                .delete(policies::delete),
        )
        .route("/v1/policies/:id/toggle", post(policies::toggle))
        .route(
            "/v1/enrollments",
            get(enrollments::list).post(enrollments::create),
        )
        .route(
            "/v1/enrollments/:id",
            get(enrollments::get_one).delete(enrollments::delete),
        )
        .route("/v1/enrollments/:id/activate", post(enrollments::activate))
        .route(
            "/v1/enrollments/:id/deactivate",
            post(enrollments::deactivate),
        )
        .route("/v1/users", get(users::list))
        .route("/v1/users/:id", get(users::get_one))
        .route("/v1/users/:id/enrollments", get(users::enrollments))
        .route("/v1/sessions", get(sessions::list))
        .route("/v1/sessions/:id/revoke", post(sessions::revoke))
        .route("/v1/agents", get(agents::list))
        .route("/v1/agents/:id", axum::routing::delete(agents::deregister))
        .route("/v1/audit", get(audit::query))
        .route("/v1/audit/stats", get(audit::stats))
        .route("/v1/backups", get(backups::list).post(backups::create))
        .route("/v1/backups/restore", post(backups::request_restore))
        .route(
            "/v1/backups/restore/confirm",
            post(backups::confirm_restore),
        )
        .route("/v1/backups/:name/download", get(backups::download))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// Map a domain error to its REST shape.
pub(crate) fn map_error(err: Error) -> Response {
    let status = match &err {
        Error::Validation(_) | Error::Json(_) | Error::Method { .. } | Error::Certificate(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Terminal(_) => StatusCode::CONFLICT,
        Error::Auth(_) | Error::Integrity => StatusCode::UNAUTHORIZED,
        Error::AttemptsExhausted => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
        // Do not leak internals on 500s.
        return api_error(status, "internal error");
    }
    api_error(status, err.to_string())
}

/// Query parameters for paginated lists. Pages are 1-based.
#[derive(Debug, Deserialize)]
pub(crate) struct PageQuery {
    #[serde(default = "d_page")]
    pub page: u64,
    #[serde(rename = "pageSize", default = "d_page_size")]
    pub page_size: u64,
}

fn d_page() -> u64 {
    1
}
fn d_page_size() -> u64 {
    50
}

/// The pagination envelope every list endpoint returns.
#[derive(Debug, Serialize)]
pub(crate) struct Page<T> {
    pub total: u64,
    pub page: u64,
    #[serde(rename = "pageSize")]
    pub page_size: u64,
    pub data: Vec<T>,
}

impl<T: Serialize> Page<T> {
    pub fn response(total: u64, query: &PageQuery, data: Vec<T>) -> Response {
        Json(Page {
            total,
            page: query.page,
            page_size: query.page_size,
            data,
        })
        .into_response()
    }
}
