use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Certificate authority
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaConfig {
    /// Directory the root certificate, key, and revocation list live in.
    #[serde(default = "d_ca_dir")]
    pub dir: PathBuf,
    /// Days an issued agent certificate is valid.
    #[serde(default = "d_agent_cert_days")]
    pub agent_cert_days: i64,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            dir: d_ca_dir(),
            agent_cert_days: d_agent_cert_days(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_ca_dir() -> PathBuf {
    PathBuf::from("ca")
}
fn d_agent_cert_days() -> i64 {
    365
}
