//! Periodic expiry sweep: sessions, challenges, restore tokens, and stale
//! agent registrations. Leader-only when HA is enabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use mfasrv_domain::config::CenterConfig;
use mfasrv_store::Store;

pub async fn run(
    store: Arc<Store>,
    config: Arc<CenterConfig>,
    is_leader: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.store.sweep_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        if !is_leader.load(Ordering::Acquire) {
            continue;
        }
        sweep_once(&store, &config);
    }
}

fn sweep_once(store: &Store, config: &CenterConfig) {
    let now = Utc::now();

    match store.expire_due_sessions(now) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "sessions expired"),
        Err(e) => tracing::warn!(error = %e, "session expiry sweep failed"),
    }
    match store.expire_due_challenges(now) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "challenges expired"),
        Err(e) => tracing::warn!(error = %e, "challenge expiry sweep failed"),
    }
    let retention = chrono::Duration::days(config.store.challenge_retention_days);
    if let Err(e) = store.purge_terminal_challenges(now - retention) {
        tracing::warn!(error = %e, "challenge purge failed");
    }
    if let Err(e) = store.purge_restore_tokens(now) {
        tracing::warn!(error = %e, "restore token purge failed");
    }
    let heartbeat_cutoff =
        now - chrono::Duration::seconds(3 * config.plane.heartbeat_secs.max(1) as i64);
    match store.mark_stale_agents_offline(heartbeat_cutoff) {
        Ok(0) => {}
        Ok(n) => tracing::warn!(count = n, "agents marked offline"),
        Err(e) => tracing::warn!(error = %e, "agent staleness sweep failed"),
    }
}
