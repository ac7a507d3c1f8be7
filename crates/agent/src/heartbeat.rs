//! Heartbeat loop: liveness to the center plus the session census, and the
//! trigger for a full policy resync when the center demands one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use mfasrv_protocol::HeartbeatRequest;

use crate::state::AgentState;
use crate::stream::ResyncSignal;

pub async fn run(state: AgentState, resync: Arc<ResyncSignal>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(
        state.config.heartbeat_secs.max(1),
    ));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => return,
        }

        let request = HeartbeatRequest {
            agent_id: state.agent_id(),
            active_sessions: state.session_cache.live_count(Utc::now()),
        };
        match state.central.heartbeat(&request).await {
            Ok(response) => {
                if !response.ack {
                    tracing::warn!("center does not recognize this agent; re-registering may be required");
                }
                if response.force_policy_sync {
                    tracing::info!("center requested a full policy resync");
                    resync.request_full();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat failed");
            }
        }
    }
}

/// Periodic local cache hygiene, independent of the center.
pub async fn run_cache_cleanup(state: AgentState, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(
        state.config.cleanup_secs.max(1),
    ));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => return,
        }
        state.session_cache.cleanup(Utc::now());
    }
}
