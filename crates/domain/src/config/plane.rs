use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent plane (mutually-authenticated RPC listener)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlaneConfig {
    #[serde(default = "d_bind")]
    pub bind: String,
    #[serde(default)]
    pub tls: TlsConfig,
    /// Heartbeat interval agents are told to use, in seconds.
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for AgentPlaneConfig {
    fn default() -> Self {
        Self {
            bind: d_bind(),
            tls: TlsConfig::default(),
            heartbeat_secs: d_heartbeat_secs(),
        }
    }
}

/// Mutual-TLS material. All three files are PEM.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// This endpoint's certificate chain.
    #[serde(default)]
    pub cert_path: PathBuf,
    /// This endpoint's private key.
    #[serde(default)]
    pub key_path: PathBuf,
    /// Root the peer's certificate must chain to.
    #[serde(default)]
    pub ca_path: PathBuf,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_bind() -> String {
    "0.0.0.0:8441".into()
}
fn d_heartbeat_secs() -> u64 {
    60
}
