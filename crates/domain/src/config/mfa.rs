use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Challenges and methods
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaConfig {
    /// Seconds an issued challenge stays answerable.
    #[serde(default = "d_challenge_validity_secs")]
    pub challenge_validity_secs: u64,
    /// Wrong answers allowed before the challenge fails.
    #[serde(default = "d_challenge_max_attempts")]
    pub challenge_max_attempts: i64,
    /// Session lifetime granted after a completed second factor, in seconds.
    #[serde(default = "d_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Issuer label in TOTP provisioning URIs.
    #[serde(default = "d_totp_issuer")]
    pub totp_issuer: String,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            challenge_validity_secs: d_challenge_validity_secs(),
            challenge_max_attempts: d_challenge_max_attempts(),
            session_ttl_secs: d_session_ttl_secs(),
            totp_issuer: d_totp_issuer(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_challenge_validity_secs() -> u64 {
    300
}
fn d_challenge_max_attempts() -> i64 {
    3
}
fn d_session_ttl_secs() -> u64 {
    8 * 3600
}
fn d_totp_issuer() -> String {
    "mfasrv".into()
}
