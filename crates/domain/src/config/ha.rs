use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// High availability / leader election
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    /// When disabled the single instance always runs background jobs.
    #[serde(default)]
    pub enabled: bool,
    /// Stable identifier of this instance. Empty means derive one from the
    /// hostname and process id at startup.
    #[serde(default)]
    pub instance_id: String,
    /// Lease validity in seconds.
    #[serde(default = "d_lease_secs")]
    pub lease_secs: u64,
    /// Seconds between renewal attempts. Must be shorter than the lease.
    #[serde(default = "d_renew_secs")]
    pub renew_secs: u64,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            instance_id: String::new(),
            lease_secs: d_lease_secs(),
            renew_secs: d_renew_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_lease_secs() -> u64 {
    30
}
fn d_renew_secs() -> u64 {
    10
}
