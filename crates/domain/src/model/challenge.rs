use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single second-factor verification attempt bound to an enrollment.
///
/// Terminal states (`approved`, `denied`, `expired`, `failed`) are immutable.
/// Expiry of an `issued` challenge is a lazy transition applied on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub user_id: String,
    pub enrollment_id: String,
    /// Normalized (lowercase) method id.
    pub method: String,
    pub status: ChallengeStatus,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    pub attempts: i64,
    pub max_attempts: i64,
    /// Method-owned opaque state (e.g. a sealed expected OTP). The
    /// orchestrator carries it without interpreting it.
    #[serde(default)]
    pub method_state: Option<String>,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub responded: Option<DateTime<Utc>>,
}

impl Challenge {
    /// Whether the row is in a state that admits no further transition.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Issued,
    Approved,
    Denied,
    Expired,
    Failed,
}

impl ChallengeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChallengeStatus::Issued)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Issued => "issued",
            ChallengeStatus::Approved => "approved",
            ChallengeStatus::Denied => "denied",
            ChallengeStatus::Expired => "expired",
            ChallengeStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "issued" => Ok(ChallengeStatus::Issued),
            "approved" => Ok(ChallengeStatus::Approved),
            "denied" => Ok(ChallengeStatus::Denied),
            "expired" => Ok(ChallengeStatus::Expired),
            "failed" => Ok(ChallengeStatus::Failed),
            other => Err(Error::Validation(format!(
                "unknown challenge status: {other}"
            ))),
        }
    }
}

/// Result of issuing a challenge, surfaced to the logon flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResult {
    pub success: bool,
    #[serde(default)]
    pub challenge_id: Option<String>,
    /// Text the interception shim shows the user (e.g. "Enter the code
    /// from your authenticator app").
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ChallengeStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of verifying a challenge response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// True when this verification exhausted the attempt budget.
    #[serde(default)]
    pub should_lockout: bool,
}

/// Status of an asynchronously verified challenge (push approval, FIDO2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncVerificationStatus {
    pub status: AsyncStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// RPC-visible challenge state. `Pending` is reported while an async method
/// is still waiting on the out-of-band approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncStatus {
    Pending,
    Issued,
    Approved,
    Denied,
    Expired,
    Failed,
}

impl From<ChallengeStatus> for AsyncStatus {
    fn from(s: ChallengeStatus) -> Self {
        match s {
            ChallengeStatus::Issued => AsyncStatus::Issued,
            ChallengeStatus::Approved => AsyncStatus::Approved,
            ChallengeStatus::Denied => AsyncStatus::Denied,
            ChallengeStatus::Expired => AsyncStatus::Expired,
            ChallengeStatus::Failed => AsyncStatus::Failed,
        }
    }
}
