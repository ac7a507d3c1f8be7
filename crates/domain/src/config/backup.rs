use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshotter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory snapshots are written to.
    #[serde(default = "d_backup_root")]
    pub root: PathBuf,
    /// Hours between scheduled snapshots. Leader-only when HA is enabled.
    #[serde(default = "d_interval_hours")]
    pub interval_hours: u64,
    /// How many snapshots to keep; the oldest beyond this count are pruned.
    #[serde(default = "d_retain")]
    pub retain: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: d_backup_root(),
            interval_hours: d_interval_hours(),
            retain: d_retain(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_backup_root() -> PathBuf {
    PathBuf::from("backups")
}
fn d_interval_hours() -> u64 {
    6
}
fn d_retain() -> usize {
    10
}
