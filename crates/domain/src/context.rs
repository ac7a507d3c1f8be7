//! Authentication context and decision types — the input and output of the
//! policy engine, and the decision record every surface ultimately returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::FailoverMode;

/// Everything known about one intercepted logon at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationContext {
    pub user_name: String,
    /// SIDs of the user's directory groups at last sync.
    #[serde(default)]
    pub user_groups: Vec<String>,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub user_ou: Option<String>,
    #[serde(default)]
    pub target_resource: Option<String>,
    /// Authentication protocol observed at the interception point
    /// (kerberos, ntlm, ldap, radius, interactive).
    pub protocol: String,
    pub timestamp: DateTime<Utc>,
}

/// The verdict for one logon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    RequireMfa,
    /// A challenge is outstanding; the caller should poll.
    Pending,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::RequireMfa => "require_mfa",
            Decision::Pending => "pending",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the policy engine concluded for a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluationResult {
    pub decision: Decision,
    #[serde(default)]
    pub matched_policy_id: Option<String>,
    #[serde(default)]
    pub matched_policy_name: Option<String>,
    /// Normalized method id the matched action requires, if any.
    #[serde(default)]
    pub required_method: Option<String>,
    pub failover_mode: FailoverMode,
    pub reason: String,
    /// True when the matched action was `alert_only` — the decision is
    /// allow, with an alert recorded on the audit side.
    #[serde(default)]
    pub alert: bool,
}

impl PolicyEvaluationResult {
    /// The default verdict when no policy matches.
    pub fn no_match() -> Self {
        Self {
            decision: Decision::Allow,
            matched_policy_id: None,
            matched_policy_name: None,
            required_method: None,
            failover_mode: FailoverMode::default(),
            reason: "no matching policy".into(),
            alert: false,
        }
    }
}

/// Normalize a method identifier at a trust boundary. The corpus of callers
/// (REST edge, RPC plane, store rows) all funnel through this before lookup
/// or comparison.
pub fn normalize_method_id(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_id_normalization() {
        assert_eq!(normalize_method_id("TOTP"), "totp");
        assert_eq!(normalize_method_id(" EmailOtp "), "emailotp");
        assert_eq!(normalize_method_id("email_otp"), "email_otp");
    }

    #[test]
    fn no_match_defaults_to_allow() {
        let r = PolicyEvaluationResult::no_match();
        assert_eq!(r.decision, Decision::Allow);
        assert_eq!(r.reason, "no matching policy");
    }
}
