//! The on-DC decision service: local session cache, then the center, then
//! the configured degraded-mode behavior.

use std::sync::atomic::Ordering;

use chrono::Utc;

use mfasrv_crypto::TokenCodec;
use mfasrv_domain::context::{AuthenticationContext, Decision};
use mfasrv_domain::model::{CachedSession, FailoverMode};
use mfasrv_protocol::{
    CheckChallengeStatusRequest, EvaluateRequest, IpcResponse, VerifyChallengeRequest,
};

use crate::state::{AgentState, PendingChallenge};

/// One intercepted logon, as the IPC surface hands it over.
#[derive(Debug, Clone)]
pub struct AuthQuery {
    pub user_name: String,
    pub domain: String,
    pub source_ip: Option<String>,
    pub protocol: String,
}

pub struct DecisionService {
    state: AgentState,
}

impl DecisionService {
    pub fn new(state: AgentState) -> Self {
        Self { state }
    }

    /// Steps, in order: session cache, central evaluation, degraded path.
    pub async fn preauth(&self, query: AuthQuery) -> IpcResponse {
        // 1. Local session cache.
        if let Some(session) = self.state.session_cache.find(
            &query.user_name,
            query.source_ip.as_deref(),
            Utc::now(),
        ) {
            tracing::debug!(
                user = %query.user_name,
                session_id = %session.session_id,
                "allow via cached session"
            );
            return IpcResponse {
                allow: true,
                decision: Decision::Allow,
                challenge_id: None,
                prompt: None,
                reason: Some("cached session".into()),
            };
        }

        // 2. Central evaluation.
        let request = EvaluateRequest {
            user_name: query.user_name.clone(),
            domain: query.domain.clone(),
            source_ip: query.source_ip.clone(),
            protocol: query.protocol.clone(),
            agent_id: self.state.agent_id(),
        };
        match self.state.central.evaluate(&request).await {
            Ok(response) => {
                self.state.central_reachable.store(true, Ordering::Release);
                if let Some(challenge_id) = &response.challenge_id {
                    self.state.pending_challenges.lock().insert(
                        challenge_id.clone(),
                        PendingChallenge {
                            user_name: query.user_name.clone(),
                            source_ip: query.source_ip.clone(),
                        },
                    );
                }
                // An allow riding an existing session carries its token:
                // re-cache so the next logon short-circuits locally. The
                // session is not new, so peers are not gossiped.
                if response.decision == Decision::Allow {
                    if let Some(token) = &response.session_token {
                        self.cache_session_token(
                            &query.user_name,
                            query.source_ip.clone(),
                            token,
                            false,
                        );
                    }
                }
                IpcResponse {
                    allow: response.decision == Decision::Allow,
                    decision: response.decision,
                    challenge_id: response.challenge_id,
                    prompt: response.challenge_metadata,
                    reason: Some(response.reason),
                }
            }
            Err(e) => {
                self.state.central_reachable.store(false, Ordering::Release);
                tracing::warn!(user = %query.user_name, error = %e, "central evaluation failed");
                self.degraded(&query)
            }
        }
    }

    /// The degraded path. A cached policy that matches this logon
    /// contributes its failover mode; otherwise the agent-wide setting
    /// applies. Step 1 already handled the cached-session allow.
    fn degraded(&self, query: &AuthQuery) -> IpcResponse {
        let ctx = AuthenticationContext {
            user_name: query.user_name.clone(),
            user_groups: Vec::new(),
            source_ip: query.source_ip.clone(),
            user_ou: None,
            target_resource: None,
            protocol: query.protocol.clone(),
            timestamp: Utc::now(),
        };
        let local = self.state.policy_cache.evaluate(&ctx);
        let mode = if local.matched_policy_id.is_some() {
            local.failover_mode
        } else {
            self.state.config.failover_mode
        };

        let (allow, reason) = match mode {
            FailoverMode::FailOpen => (true, "central unreachable, fail-open allow"),
            FailoverMode::FailClose => (false, "central unreachable, fail-close deny"),
            // No cached session (step 1 missed) means deny.
            FailoverMode::CachedOnly => (false, "central unreachable, no cached session"),
        };
        tracing::warn!(
            user = %query.user_name,
            mode = %mode,
            allow,
            matched_policy = local.matched_policy_id.as_deref().unwrap_or("-"),
            "degraded-mode decision"
        );
        IpcResponse {
            allow,
            decision: if allow { Decision::Allow } else { Decision::Deny },
            challenge_id: None,
            prompt: None,
            reason: Some(reason.into()),
        }
    }

    /// Forward a challenge answer; a success caches the session locally
    /// and gossips it to peers.
    pub async fn submit_mfa(&self, challenge_id: String, response: String) -> IpcResponse {
        let request = VerifyChallengeRequest {
            challenge_id: challenge_id.clone(),
            response,
        };
        match self.state.central.verify_challenge(&request).await {
            Ok(result) if result.success => {
                self.adopt_session(&challenge_id, result.session_token.as_deref());
                IpcResponse {
                    allow: true,
                    decision: Decision::Allow,
                    challenge_id: Some(challenge_id),
                    prompt: None,
                    reason: Some("second factor verified".into()),
                }
            }
            Ok(result) => IpcResponse {
                allow: false,
                decision: Decision::Deny,
                challenge_id: Some(challenge_id),
                prompt: None,
                reason: result.error,
            },
            Err(e) => {
                tracing::warn!(challenge_id = %challenge_id, error = %e, "verify call failed");
                // An unverifiable answer is not a malfunction of the logon
                // path itself; the challenge stays answerable.
                IpcResponse {
                    allow: false,
                    decision: Decision::Pending,
                    challenge_id: Some(challenge_id),
                    prompt: None,
                    reason: Some("verification temporarily unavailable".into()),
                }
            }
        }
    }

    /// Poll an async challenge.
    pub async fn check_status(&self, challenge_id: String) -> IpcResponse {
        let request = CheckChallengeStatusRequest {
            challenge_id: challenge_id.clone(),
        };
        match self.state.central.check_challenge_status(&request).await {
            Ok(result) => {
                use mfasrv_domain::model::AsyncStatus;
                let approved = result.status == AsyncStatus::Approved;
                if approved {
                    self.adopt_session(&challenge_id, result.session_token.as_deref());
                }
                IpcResponse {
                    allow: approved,
                    decision: match result.status {
                        AsyncStatus::Approved => Decision::Allow,
                        AsyncStatus::Pending | AsyncStatus::Issued => Decision::Pending,
                        _ => Decision::Deny,
                    },
                    challenge_id: Some(challenge_id),
                    prompt: None,
                    reason: result.error,
                }
            }
            Err(e) => {
                tracing::warn!(challenge_id = %challenge_id, error = %e, "status call failed");
                IpcResponse {
                    allow: false,
                    decision: Decision::Pending,
                    challenge_id: Some(challenge_id),
                    prompt: None,
                    reason: Some("status temporarily unavailable".into()),
                }
            }
        }
    }

    /// Cache the session a completed challenge produced and replicate it.
    fn adopt_session(&self, challenge_id: &str, token: Option<&str>) {
        let Some(pending) = self.state.pending_challenges.lock().remove(challenge_id) else {
            return;
        };
        let Some(token) = token else {
            return;
        };
        self.cache_session_token(&pending.user_name, pending.source_ip, token, true);
    }

    /// Cache a session from its wire token, optionally gossiping it to
    /// peers (only sessions this DC originated are broadcast). The token
    /// is parsed (not verified — the agent has no MAC key) only for its id
    /// and expiry; the *decision* was the center's.
    fn cache_session_token(
        &self,
        user_name: &str,
        source_ip: Option<String>,
        token: &str,
        broadcast: bool,
    ) {
        let claims = TokenCodec::from_wire(token)
            .and_then(|bytes| TokenCodec::peek(&bytes));
        let Ok(claims) = claims else {
            tracing::warn!(user = %user_name, "unparseable session token; not caching");
            return;
        };

        let session = CachedSession {
            session_id: format!("{:032x}", claims.session_id),
            user_id: claims.user_id,
            user_name: user_name.to_owned(),
            source_ip: source_ip.unwrap_or_default(),
            expires_at: claims.expires,
            verified_method: String::new(),
            revoked: false,
        };
        let event = self
            .state
            .session_cache
            .insert_local(session, &self.state.agent_id());
        if broadcast {
            self.state.gossip.broadcast(event);
        }
    }
}
