use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Key material
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Names of the environment variables carrying the two process-level keys.
/// Both values are 32 bytes, base64-encoded. The keys themselves never
/// appear in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// HMAC-SHA256 key for session tokens.
    #[serde(default = "d_signing_key_env")]
    pub signing_key_env: String,
    /// AES-256-GCM key for enrollment secrets at rest.
    #[serde(default = "d_encryption_key_env")]
    pub encryption_key_env: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            signing_key_env: d_signing_key_env(),
            encryption_key_env: d_encryption_key_env(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_signing_key_env() -> String {
    "MFASRV_SIGNING_KEY".into()
}
fn d_encryption_key_env() -> String {
    "MFASRV_ENCRYPTION_KEY".into()
}
