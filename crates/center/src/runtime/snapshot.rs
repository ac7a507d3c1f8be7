//! Scheduled and manual snapshots of the state store, with retention by
//! count. Manual and scheduled runs are serialized by a mutex so they can
//! never overlap; restore is two-phase through a persisted single-use token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use mfasrv_domain::config::BackupConfig;
use mfasrv_domain::{Error, Result};
use mfasrv_store::{is_valid_backup_name, list_backups, prune_backups, BackupInfo, Store};

pub struct Snapshotter {
    store: Arc<Store>,
    config: BackupConfig,
    /// Serializes snapshot and restore invocations.
    gate: Mutex<()>,
}

impl Snapshotter {
    pub fn new(store: Arc<Store>, config: BackupConfig) -> Self {
        Self {
            store,
            config,
            gate: Mutex::new(()),
        }
    }

    pub fn backup_root(&self) -> &std::path::Path {
        &self.config.root
    }

    /// Take one snapshot and apply retention. Used by both the schedule and
    /// the REST surface.
    pub async fn snapshot(&self) -> Result<String> {
        let _gate = self.gate.lock().await;
        let file_name = self.store.snapshot_to(&self.config.root, Utc::now())?;
        match prune_backups(&self.config.root, self.config.retain) {
            Ok(deleted) if !deleted.is_empty() => {
                tracing::info!(count = deleted.len(), "old snapshots pruned");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "snapshot pruning failed"),
        }
        Ok(file_name)
    }

    pub fn list(&self) -> Result<Vec<BackupInfo>> {
        list_backups(&self.config.root)
    }

    /// Phase one of restore: validate the target and mint the confirmation
    /// token (persisted, 5-minute validity, single use).
    pub fn request_restore(&self, file_name: &str, now: DateTime<Utc>) -> Result<String> {
        if !is_valid_backup_name(file_name) {
            return Err(Error::Validation(format!(
                "not a backup file name: {file_name}"
            )));
        }
        if !self.config.root.join(file_name).is_file() {
            return Err(Error::NotFound(format!("backup {file_name}")));
        }
        self.store.create_restore_token(file_name, now)
    }

    /// Phase two: redeem the token and replace the live database.
    pub async fn confirm_restore(&self, token: &str, now: DateTime<Utc>) -> Result<String> {
        let Some(file_name) = self.store.consume_restore_token(token, now)? else {
            return Err(Error::Validation(
                "restore token is unknown, used, or expired".into(),
            ));
        };
        let _gate = self.gate.lock().await;
        self.store.restore_from(&self.config.root, &file_name)?;
        Ok(file_name)
    }
}

/// Scheduled snapshot loop; leader-only when HA is enabled.
pub async fn run(
    snapshotter: Arc<Snapshotter>,
    is_leader: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let hours = snapshotter.config.interval_hours.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(hours * 3600));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The immediate first tick would snapshot at startup; skip it.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        if !is_leader.load(Ordering::Acquire) {
            continue;
        }
        match snapshotter.snapshot().await {
            Ok(file) => tracing::info!(file = %file, "scheduled snapshot complete"),
            Err(e) => tracing::error!(error = %e, "scheduled snapshot failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshotter(root: std::path::PathBuf) -> Snapshotter {
        Snapshotter::new(
            Arc::new(Store::open_in_memory().unwrap()),
            BackupConfig {
                root,
                interval_hours: 6,
                retain: 3,
            },
        )
    }

    #[tokio::test]
    async fn two_phase_restore_flow() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("state.db")).unwrap());
        let snap = Snapshotter::new(
            store.clone(),
            BackupConfig {
                root: dir.path().join("backups"),
                interval_hours: 6,
                retain: 3,
            },
        );

        let file = snap.snapshot().await.unwrap();
        let now = Utc::now();
        let token = snap.request_restore(&file, now).unwrap();
        let restored = snap.confirm_restore(&token, now).await.unwrap();
        assert_eq!(restored, file);
        // The token was single-use.
        assert!(snap.confirm_restore(&token, now).await.is_err());
    }

    #[tokio::test]
    async fn restore_request_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshotter(dir.path().to_path_buf());
        let now = Utc::now();
        assert!(snap.request_restore("../etc/passwd", now).is_err());
        assert!(snap
            .request_restore("mfasrv_backup_20990101_000000.db", now)
            .is_err());
    }
}
