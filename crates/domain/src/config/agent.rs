use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::TlsConfig;
use crate::model::FailoverMode;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DC agent config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Top-level config file of the agent binary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentFileConfig {
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the central agent plane, e.g. `https://center:8441`.
    #[serde(default)]
    pub center_url: String,
    /// Hostname reported at registration. Empty means use the OS hostname.
    #[serde(default)]
    pub hostname: String,
    /// Agent identifier assigned at registration; persisted back into
    /// `cache_metadata` on first successful register.
    #[serde(default)]
    pub agent_id: String,
    /// `dc` or `endpoint`.
    #[serde(default = "d_agent_type")]
    pub agent_type: String,
    /// Behavior when the center is unreachable.
    #[serde(default)]
    pub failover_mode: FailoverMode,
    /// Client-side mTLS material (issued by the center's CA).
    #[serde(default)]
    pub tls: TlsConfig,
    /// Path of the local WAL cache database.
    #[serde(default = "d_cache_path")]
    pub cache_path: PathBuf,
    /// Unix socket the host interception shim connects to.
    #[serde(default = "d_ipc_socket")]
    pub ipc_socket: PathBuf,
    /// Seconds between heartbeats to the center.
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Peer DC agent gossip endpoints, e.g. `https://dc2:8442`.
    #[serde(default)]
    pub gossip_peers: Vec<String>,
    /// Bind address of this agent's gossip listener.
    #[serde(default = "d_gossip_bind")]
    pub gossip_bind: String,
    /// Seconds between local cache cleanup passes.
    #[serde(default = "d_cleanup_secs")]
    pub cleanup_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            center_url: String::new(),
            hostname: String::new(),
            agent_id: String::new(),
            agent_type: d_agent_type(),
            failover_mode: FailoverMode::default(),
            tls: TlsConfig::default(),
            cache_path: d_cache_path(),
            ipc_socket: d_ipc_socket(),
            heartbeat_secs: d_heartbeat_secs(),
            gossip_peers: Vec::new(),
            gossip_bind: d_gossip_bind(),
            cleanup_secs: d_cleanup_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_agent_type() -> String {
    "dc".into()
}
fn d_cache_path() -> PathBuf {
    PathBuf::from("agent-cache.db")
}
fn d_ipc_socket() -> PathBuf {
    PathBuf::from("/run/mfasrv/agent.sock")
}
fn d_heartbeat_secs() -> u64 {
    60
}
fn d_gossip_bind() -> String {
    "0.0.0.0:8442".into()
}
fn d_cleanup_secs() -> u64 {
    300
}
