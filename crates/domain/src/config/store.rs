use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Central state store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the relational state file.
    #[serde(default = "d_store_path")]
    pub path: PathBuf,
    /// Seconds between expiry sweeps (sessions, challenges, stale agents).
    /// Leader-only when HA is enabled.
    #[serde(default = "d_sweep_secs")]
    pub sweep_secs: u64,
    /// Days a terminal challenge row is retained before the sweeper purges it.
    #[serde(default = "d_challenge_retention_days")]
    pub challenge_retention_days: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: d_store_path(),
            sweep_secs: d_sweep_secs(),
            challenge_retention_days: d_challenge_retention_days(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_store_path() -> PathBuf {
    PathBuf::from("mfasrv.db")
}
fn d_sweep_secs() -> u64 {
    300
}
fn d_challenge_retention_days() -> i64 {
    30
}
