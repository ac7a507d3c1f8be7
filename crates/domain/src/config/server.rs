use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Administrative REST server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Environment variable holding the admin bearer token. If the env var
    /// is unset, admin endpoints are **disabled** (403).
    #[serde(default = "d_admin_token_env")]
    pub admin_token_env: String,
    /// Bind address for the Prometheus scrape endpoint. Empty disables it
    /// (metrics stay reachable on the admin server at `/metrics`).
    #[serde(default)]
    pub prometheus_bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8440,
            host: "127.0.0.1".into(),
            admin_token_env: d_admin_token_env(),
            prometheus_bind: String::new(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    8440
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_admin_token_env() -> String {
    "MFASRV_ADMIN_TOKEN".into()
}
