use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mfasrv_domain::context::Decision;
use mfasrv_domain::model::AsyncStatus;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent → Center RPC
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `EvaluateAuthentication` — one intercepted logon asking for a verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub user_name: String,
    pub domain: String,
    #[serde(default)]
    pub source_ip: Option<String>,
    pub protocol: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub decision: Decision,
    /// Base64-url token of the live session an `allow` rides, re-derived
    /// from the session row so the agent can re-cache it after a restart.
    /// Fresh sessions are minted by `VerifyChallenge`, not here.
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub challenge_id: Option<String>,
    pub reason: String,
    /// How long the shim should wait for the second factor, in ms.
    pub timeout_ms: u64,
    #[serde(default)]
    pub required_method: Option<String>,
    /// Method-specific prompt data (e.g. "enter the 6-digit code").
    #[serde(default)]
    pub challenge_metadata: Option<String>,
}

/// `VerifyChallenge` — the user's answer to an outstanding challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyChallengeRequest {
    pub challenge_id: String,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyChallengeResponse {
    pub success: bool,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `CheckChallengeStatus` — poll an async-capable challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckChallengeStatusRequest {
    pub challenge_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckChallengeStatusResponse {
    pub status: AsyncStatus,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `RegisterAgent` — first contact from a DC or endpoint agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentRequest {
    pub hostname: String,
    /// `dc` or `endpoint`.
    pub agent_type: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentResponse {
    pub success: bool,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `Heartbeat` — liveness plus a cheap session census.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    pub active_sessions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ack: bool,
    /// Set when the center believes the agent's policy watermark is stale;
    /// the agent should re-run `SyncPolicies` from scratch.
    pub force_policy_sync: bool,
}

/// `EnrollCertificate` — CSR exchange for mTLS material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollCertificateRequest {
    pub agent_id: String,
    pub agent_type: String,
    pub csr_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollCertificateResponse {
    pub success: bool,
    #[serde(default)]
    pub signed_cert_pem: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `SyncPolicies` — subscription request; the response is a frame stream of
/// [`PolicyUpdate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPoliciesRequest {
    pub agent_id: String,
    /// High-watermark of the agent's local policy cache. The center replays
    /// anything fresher before switching to live updates.
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

/// One policy mutation, streamed to every subscribed agent. Deletes carry
/// empty JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub policy_id: String,
    pub policy_json: String,
    pub deleted: bool,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DC ↔ DC gossip
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A session creation or revocation, replicated peer-to-peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub source_ip: String,
    pub verified_method: String,
    pub expires: DateTime<Utc>,
    pub revoked: bool,
    /// Agent id of the DC that originated the event.
    pub origin_id: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// Last-writer-wins: a later timestamp supersedes an earlier one, and
    /// equal timestamps break on `session_id` order. Revocation dominance
    /// (a revoked session never resurrects) is enforced by the cache that
    /// applies events, not by this ordering.
    pub fn supersedes(&self, other: &SessionEvent) -> bool {
        match self.timestamp.cmp(&other.timestamp) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.session_id > other.session_id,
        }
    }
}

/// `GossipSession` response: the receiver's monotonically increasing
/// sequence for this sender, used to prune the sender's retry queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipAck {
    pub sequence: u64,
}

/// `Ack` — sender confirms it observed `sequence` and pruned through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRequest {
    pub session_id: String,
    pub sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shim ↔ Agent IPC (local socket, JSON lines)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A request from the host interception shim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IpcRequest {
    Preauth {
        user_name: String,
        domain: String,
        #[serde(default)]
        source_ip: Option<String>,
        protocol: String,
    },
    SubmitMfa {
        challenge_id: String,
        response: String,
    },
    CheckStatus {
        challenge_id: String,
    },
    Fido2Begin {
        user_name: String,
    },
    Fido2Complete {
        challenge_id: String,
        assertion: String,
    },
}

/// The shim-facing answer. `allow` is the only field the shim is required
/// to honor — everything else is presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub allow: bool,
    pub decision: Decision,
    #[serde(default)]
    pub challenge_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl IpcResponse {
    /// The fail-open answer: the MFA layer must never block a logon on its
    /// own malfunction.
    pub fn fail_open(reason: impl Into<String>) -> Self {
        Self {
            allow: true,
            decision: Decision::Allow,
            challenge_id: None,
            prompt: None,
            reason: Some(reason.into()),
        }
    }
}
