//! Policy CRUD + toggle. Every mutation publishes a `PolicyUpdate` to the
//! stream hub so subscribed agents converge without polling.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use mfasrv_domain::model::{FailoverMode, Policy, PolicyAction, RuleGroup};
use mfasrv_protocol::PolicyUpdate;

use super::guard::AdminGuard;
use super::{api_error, map_error, Page, PageQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PolicyBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "d_true")]
    pub enabled: bool,
    pub priority: i64,
    #[serde(default)]
    pub failover_mode: FailoverMode,
    #[serde(default)]
    pub rule_groups: Vec<RuleGroup>,
    #[serde(default)]
    pub actions: Vec<PolicyAction>,
}

fn d_true() -> bool {
    true
}

impl PolicyBody {
    fn into_policy(self, id: String) -> Policy {
        Policy {
            id,
            name: self.name,
            description: self.description,
            enabled: self.enabled,
            priority: self.priority,
            failover_mode: self.failover_mode,
            rule_groups: self.rule_groups,
            actions: self.actions,
            updated: Utc::now(),
        }
    }
}

fn publish(state: &AppState, policy: &Policy, deleted: bool) {
    let policy_json = if deleted {
        String::new()
    } else {
        serde_json::to_string(policy).unwrap_or_default()
    };
    state.policy_hub.publish(PolicyUpdate {
        policy_id: policy.id.clone(),
        policy_json,
        deleted,
        updated_at: policy.updated,
    });
}

pub async fn list(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.store.list_policies(query.page, query.page_size) {
        Ok((total, data)) => Page::response(total, &query, data),
        Err(e) => map_error(e),
    }
}

pub async fn get_one(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_policy(&id) {
        Ok(Some(policy)) => Json(policy).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "policy not found"),
        Err(e) => map_error(e),
    }
}

pub async fn create(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<PolicyBody>,
) -> Response {
    if body.actions.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "policy needs at least one action");
    }
    let policy = body.into_policy(Uuid::new_v4().to_string());
    if let Err(e) = state.store.insert_policy(&policy) {
        return map_error(e);
    }
    publish(&state, &policy, false);
    tracing::info!(policy_id = %policy.id, name = %policy.name, "policy created");
    (StatusCode::CREATED, Json(policy)).into_response()
}

pub async fn update(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PolicyBody>,
) -> Response {
    let policy = body.into_policy(id);
    if let Err(e) = state.store.update_policy(&policy) {
        return map_error(e);
    }
    publish(&state, &policy, false);
    tracing::info!(policy_id = %policy.id, "policy updated");
    Json(policy).into_response()
}

pub async fn toggle(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let current = match state.store.get_policy(&id) {
        Ok(Some(p)) => p,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "policy not found"),
        Err(e) => return map_error(e),
    };
    match state
        .store
        .set_policy_enabled(&id, !current.enabled, Utc::now())
    {
        Ok(Some(policy)) => {
            // A disabled policy must stop matching on agents too: send the
            // refreshed row (its `enabled` flag drives cache eviction).
            publish(&state, &policy, false);
            tracing::info!(policy_id = %id, enabled = policy.enabled, "policy toggled");
            Json(policy).into_response()
        }
        Ok(None) => api_error(StatusCode::NOT_FOUND, "policy not found"),
        Err(e) => map_error(e),
    }
}

pub async fn delete(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let current = match state.store.get_policy(&id) {
        Ok(Some(p)) => p,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "policy not found"),
        Err(e) => return map_error(e),
    };
    match state.store.delete_policy(&id) {
        Ok(true) => {
            let mut tombstone = current;
            tombstone.updated = Utc::now();
            publish(&state, &tombstone, true);
            tracing::info!(policy_id = %id, "policy deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, "policy not found"),
        Err(e) => map_error(e),
    }
}
