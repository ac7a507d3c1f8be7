//! `SyncPolicies` — a long-lived streaming response of length-prefixed
//! policy updates.
//!
//! The handler first replays the stored policy set (filtered by the agent's
//! `last_sync` watermark; a missing watermark means full replay), then
//! switches to live updates from the hub. Deletions that happened while the
//! agent was offline are not replayable — the heartbeat's
//! `force_policy_sync` sends such agents back here with no watermark, and a
//! full replay replaces their cache wholesale.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use mfasrv_protocol::{encode_frame, PolicyUpdate, SyncPoliciesRequest, RPC_CONTENT_TYPE};

use super::{parse, unavailable};
use crate::runtime::policy_hub::{PolicyStreamHub, Subscriber};
use crate::state::AppState;

/// Detaches the subscription when the response body is dropped (client
/// disconnect included).
struct SubscriptionGuard {
    hub: Arc<PolicyStreamHub>,
    agent_id: String,
    subscriber: Arc<Subscriber>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.agent_id, &self.subscriber);
        tracing::debug!(agent_id = %self.agent_id, "policy stream detached");
    }
}

/// Page through the whole stored policy set, keeping what is fresher than
/// the agent's watermark.
fn load_backlog(
    state: &AppState,
    last_sync: Option<chrono::DateTime<chrono::Utc>>,
) -> mfasrv_domain::Result<Vec<PolicyUpdate>> {
    let mut backlog = Vec::new();
    let mut page = 1u64;
    loop {
        let (total, policies) = state.store.list_policies(page, 200)?;
        let fetched = policies.len();
        backlog.extend(
            policies
                .into_iter()
                .filter(|p| match last_sync {
                    Some(watermark) => p.updated > watermark,
                    None => true,
                })
                .map(|p| PolicyUpdate {
                    policy_id: p.id.clone(),
                    policy_json: serde_json::to_string(&p).unwrap_or_default(),
                    deleted: false,
                    updated_at: p.updated,
                }),
        );
        if fetched == 0 || page * 200 >= total {
            return Ok(backlog);
        }
        page += 1;
    }
}

pub async fn sync_policies(State(state): State<AppState>, body: Bytes) -> Response {
    let req: SyncPoliciesRequest = match parse(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let backlog = match load_backlog(&state, req.last_sync) {
        Ok(backlog) => backlog,
        Err(e) => return unavailable(e),
    };

    let subscriber = state.policy_hub.subscribe(&req.agent_id);
    let guard = SubscriptionGuard {
        hub: state.policy_hub.clone(),
        agent_id: req.agent_id.clone(),
        subscriber: subscriber.clone(),
    };
    tracing::info!(
        agent_id = %req.agent_id,
        backlog = backlog.len(),
        full = req.last_sync.is_none(),
        "policy stream attached"
    );

    let stream = async_stream::stream! {
        // Owned by the stream: dropped (and unsubscribed) with it.
        let _guard = guard;

        for update in backlog {
            match encode_frame(&update) {
                Ok(frame) => yield Ok::<_, std::io::Error>(Bytes::from(frame)),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping unencodable backlog frame");
                }
            }
        }
        loop {
            if !subscriber.wait().await {
                break;
            }
            for update in subscriber.drain() {
                match encode_frame(&update) {
                    Ok(frame) => yield Ok::<_, std::io::Error>(Bytes::from(frame)),
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unencodable frame");
                    }
                }
            }
        }
    };

    (
        [(header::CONTENT_TYPE, RPC_CONTENT_TYPE)],
        Body::from_stream(stream),
    )
        .into_response()
}
