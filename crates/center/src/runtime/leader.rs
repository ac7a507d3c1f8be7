//! Leader-lease election loop. Only the leader runs the background jobs;
//! every instance keeps serving request traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use mfasrv_domain::config::HaConfig;
use mfasrv_store::{LeaseState, Store};

/// Run the election loop until cancellation. With HA disabled the flag is
/// pinned to leader and the loop exits immediately.
pub async fn run(
    store: Arc<Store>,
    ha: HaConfig,
    instance_id: Arc<str>,
    is_leader: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    if !ha.enabled {
        is_leader.store(true, Ordering::Release);
        tracing::info!("HA disabled; this instance runs all background jobs");
        return;
    }

    let lease = chrono::Duration::seconds(ha.lease_secs as i64);
    let mut interval = tokio::time::interval(Duration::from_secs(ha.renew_secs.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }

        let was_leader = is_leader.load(Ordering::Acquire);
        match store.tick_leader_lease(&instance_id, Utc::now(), lease) {
            Ok(LeaseState::Leader) => {
                if !was_leader {
                    tracing::info!(instance_id = %instance_id, "acquired leader lease");
                }
                is_leader.store(true, Ordering::Release);
            }
            Ok(LeaseState::Standby) => {
                if was_leader {
                    tracing::warn!(instance_id = %instance_id, "lost leader lease, standing by");
                }
                is_leader.store(false, Ordering::Release);
            }
            Err(e) => {
                // A lease we cannot renew is a lease we may no longer hold.
                tracing::warn!(error = %e, "leader lease tick failed; demoting");
                is_leader.store(false, Ordering::Release);
            }
        }
    }

    if is_leader.swap(false, Ordering::AcqRel) {
        if let Err(e) = store.release_leader_lease(&instance_id, Utc::now()) {
            tracing::warn!(error = %e, "failed to release leader lease on shutdown");
        }
    }
}
