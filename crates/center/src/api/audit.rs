//! Audit query surface.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use mfasrv_store::AuditQuery;

use super::guard::AdminGuard;
use super::{map_error, Page, PageQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
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

pub async fn query(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Response {
    let page = PageQuery {
        page: params.page,
        page_size: params.page_size,
    };
    let q = AuditQuery {
        user_id: params.user_id,
        event_type: params.event_type,
        from: params.from,
        to: params.to,
        page: page.page,
        page_size: page.page_size,
    };
    match state.store.query_audit(&q) {
        Ok((total, data)) => Page::response(total, &page, data),
        Err(e) => map_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

/// Hourly activity counts. Buckets are full hours since the epoch — the
/// same wall-clock hour on different days stays distinct.
pub async fn stats(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Response {
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params.from.unwrap_or(to - Duration::hours(24));
    match state.store.audit_hourly_stats(from, to) {
        Ok(buckets) => Json(buckets).into_response(),
        Err(e) => map_error(e),
    }
}
