use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A bearer session asserting that MFA was completed.
///
/// The token itself is never stored; `token_hash` is the SHA-256 of the
/// encoded token bytes, compared in fixed time during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Hex-encoded 128-bit opaque identifier.
    pub id: String,
    pub user_id: String,
    /// Hex-encoded SHA-256 of the token bytes.
    pub token_hash: String,
    pub source_ip: String,
    #[serde(default)]
    pub target_resource: Option<String>,
    /// Normalized method id that satisfied the second factor.
    pub verified_method: String,
    pub status: SessionStatus,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    /// Hostname of the DC that observed the completing logon, if any.
    #[serde(default)]
    pub dc_hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "expired" => Ok(SessionStatus::Expired),
            "revoked" => Ok(SessionStatus::Revoked),
            other => Err(Error::Validation(format!("unknown session status: {other}"))),
        }
    }
}

/// The projection of a session a DC agent keeps in its local cache.
/// Only non-revoked, non-expired sessions are worth caching; both flags are
/// still tracked so gossip can converge on revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSession {
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub source_ip: String,
    pub expires_at: DateTime<Utc>,
    pub verified_method: String,
    pub revoked: bool,
}

impl CachedSession {
    /// Whether this cached entry can still satisfy a logon at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}
