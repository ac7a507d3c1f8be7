//! Policy stream subscriber: a long-lived frame stream from the center,
//! applied to the policy cache as updates arrive. Disconnects reconnect
//! with exponential backoff (reset after a clean connection); a heartbeat
//! that demands `force_policy_sync` drops the stream and resubscribes with
//! no watermark, replacing the cache wholesale.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use mfasrv_protocol::{decode_message, FrameBuffer, PolicyUpdate, SyncPoliciesRequest};

use crate::cache::PolicyCache;
use crate::central::{CentralClient, ReconnectBackoff};
use crate::state::AgentState;

/// Signals a full resynchronization of the policy cache.
pub struct ResyncSignal {
    force_full: AtomicBool,
    notify: Notify,
}

impl ResyncSignal {
    pub fn new() -> Self {
        Self {
            force_full: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn request_full(&self) {
        self.force_full.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn take(&self) -> bool {
        self.force_full.swap(false, Ordering::AcqRel)
    }
}

impl Default for ResyncSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run(state: AgentState, resync: Arc<ResyncSignal>, shutdown: CancellationToken) {
    let backoff = ReconnectBackoff::default();
    let mut attempt: u32 = 0;
    let mut force_full = state.policy_cache.is_empty();

    loop {
        if shutdown.is_cancelled() {
            return;
        }
        force_full |= resync.take();

        match subscribe_once(
            &state.central,
            &state.policy_cache,
            &state.agent_id(),
            force_full,
            &resync,
            &shutdown,
        )
        .await
        {
            Ok(clean) => {
                // A stream that delivered and closed cleanly resets backoff.
                attempt = 0;
                force_full = !clean;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "policy stream failed");
                let delay = backoff.delay_for_attempt(attempt);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }
}

/// One subscription. Returns `Ok(true)` on a clean close, `Ok(false)` when
/// the stream was dropped to honor a resync request.
async fn subscribe_once(
    central: &CentralClient,
    cache: &PolicyCache,
    agent_id: &str,
    full: bool,
    resync: &ResyncSignal,
    shutdown: &CancellationToken,
) -> mfasrv_domain::Result<bool> {
    let request = SyncPoliciesRequest {
        agent_id: agent_id.to_owned(),
        last_sync: if full { None } else { cache.last_sync() },
    };
    let mut response = central.open_policy_stream(&request).await?;
    tracing::info!(full, "policy stream connected");

    if full {
        cache.clear();
    }

    let mut buffer = FrameBuffer::new();
    loop {
        let chunk = tokio::select! {
            chunk = response.chunk() => chunk.map_err(|e| mfasrv_domain::Error::Http(e.to_string()))?,
            _ = resync.notify.notified() => {
                tracing::info!("dropping policy stream for full resync");
                resync.force_full.store(true, Ordering::Release);
                return Ok(false);
            }
            _ = shutdown.cancelled() => return Ok(true),
        };
        let Some(bytes) = chunk else {
            tracing::info!("policy stream closed by center");
            return Ok(true);
        };
        buffer.push(&bytes);
        while let Some(payload) = buffer.next_frame()? {
            match decode_message::<PolicyUpdate>(&payload) {
                Ok(update) => {
                    tracing::debug!(
                        policy_id = %update.policy_id,
                        deleted = update.deleted,
                        "policy update applied"
                    );
                    cache.apply(&update);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable policy frame ignored");
                }
            }
        }
    }
}
