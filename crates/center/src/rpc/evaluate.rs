//! `EvaluateAuthentication` — the central decision path for one logon.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;

use mfasrv_challenge::IssueRequest;
use mfasrv_domain::context::{AuthenticationContext, Decision};
use mfasrv_domain::model::{AuditEvent, EnrollmentStatus, User};
use mfasrv_domain::Result;
use mfasrv_protocol::{EvaluateRequest, EvaluateResponse};

use super::{parse, respond, unavailable};
use crate::metrics;
use crate::state::AppState;

pub async fn evaluate(State(state): State<AppState>, body: Bytes) -> Response {
    let req: EvaluateRequest = match parse(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    match handle(&state, req).await {
        Ok(resp) => {
            metrics::DECISIONS
                .with_label_values(&[resp.decision.as_str()])
                .inc();
            respond(&resp)
        }
        Err(e) => unavailable(e),
    }
}

async fn handle(state: &AppState, req: EvaluateRequest) -> Result<EvaluateResponse> {
    let user = state.store.find_user_by_name(&req.user_name)?;
    let groups = match &user {
        Some(u) => state
            .store
            .group_memberships(&u.id)?
            .into_iter()
            .map(|m| m.group_sid)
            .collect(),
        None => Vec::new(),
    };

    let ctx = AuthenticationContext {
        user_name: req.user_name.clone(),
        user_groups: groups,
        source_ip: req.source_ip.clone(),
        user_ou: user.as_ref().map(|u| ou_of(&u.dn)),
        target_resource: None,
        protocol: req.protocol.clone(),
        timestamp: Utc::now(),
    };
    let result = state.engine.evaluate(&ctx)?;

    if result.alert {
        state.store.append_audit(
            &AuditEvent::new("policy_alert", true)
                .user_name(&req.user_name)
                .source_ip(req.source_ip.clone().unwrap_or_default())
                .details(result.reason.clone())
                .agent(&req.agent_id),
            Utc::now(),
        )?;
    }

    let resp = match result.decision {
        Decision::Allow | Decision::Pending => {
            allowed(state, &req, user.as_ref(), result.reason.clone(), None)?
        }
        Decision::Deny => {
            state.store.append_audit(
                &AuditEvent::new("auth_denied", false)
                    .user_name(&req.user_name)
                    .source_ip(req.source_ip.clone().unwrap_or_default())
                    .details(result.reason.clone())
                    .agent(&req.agent_id),
                Utc::now(),
            )?;
            EvaluateResponse {
                decision: Decision::Deny,
                session_token: None,
                challenge_id: None,
                reason: result.reason,
                timeout_ms: 0,
                required_method: None,
                challenge_metadata: None,
            }
        }
        Decision::RequireMfa => require_mfa(state, &req, user, result.required_method).await?,
    };
    Ok(resp)
}

fn allowed(
    state: &AppState,
    req: &EvaluateRequest,
    user: Option<&User>,
    reason: String,
    session_token: Option<String>,
) -> Result<EvaluateResponse> {
    if let Some(user) = user {
        state.store.touch_last_auth(&user.id, Utc::now())?;
    }
    state.store.append_audit(
        &AuditEvent::new("auth_allowed", true)
            .user_name(&req.user_name)
            .source_ip(req.source_ip.clone().unwrap_or_default())
            .details(reason.clone())
            .agent(&req.agent_id),
        Utc::now(),
    )?;
    Ok(EvaluateResponse {
        decision: Decision::Allow,
        session_token,
        challenge_id: None,
        reason,
        timeout_ms: 0,
        required_method: None,
        challenge_metadata: None,
    })
}

async fn require_mfa(
    state: &AppState,
    req: &EvaluateRequest,
    user: Option<User>,
    required_method: Option<String>,
) -> Result<EvaluateResponse> {
    // A user the store has never seen cannot complete a second factor.
    // The posture mirrors enrollment grace: allow, loudly.
    let Some(user) = user else {
        return allowed(state, req, None, "user not present in MFA store".into(), None);
    };

    // An existing live session for this (user, source) short-circuits.
    // Its token rides along so an agent with a cold cache can re-cache
    // the session instead of asking again on every logon.
    if let Some(ip) = &req.source_ip {
        if let Some(session) = state.sessions.find_active(&user.id, ip)? {
            let token = state.sessions.reissue_token(&session);
            return allowed(
                state,
                req,
                Some(&user),
                format!("active session {}", session.id),
                token,
            );
        }
    }

    // Pick the method: the policy's, or the user's first active enrollment.
    let method = match required_method {
        Some(m) => m,
        None => {
            let enrollment = state
                .store
                .enrollments_for_user(&user.id)?
                .into_iter()
                .find(|e| e.status == EnrollmentStatus::Active);
            match enrollment {
                Some(e) => e.method,
                None => {
                    return allowed(
                        state,
                        req,
                        Some(&user),
                        "MFA required but user has no active enrollment".into(),
                        None,
                    );
                }
            }
        }
    };

    let issued = state
        .challenges
        .issue(
            &user.id,
            &method,
            IssueRequest {
                source_ip: req.source_ip.clone(),
                target: None,
            },
        )
        .await?;

    if !issued.success {
        // Enrollment disappeared between the check and the issue.
        return allowed(
            state,
            req,
            Some(&user),
            issued.error.unwrap_or_else(|| "challenge not issuable".into()),
            None,
        );
    }

    metrics::CHALLENGES_ISSUED.inc();
    state.store.append_audit(
        &AuditEvent::new("challenge_issued", true)
            .user(&user.id, &req.user_name)
            .source_ip(req.source_ip.clone().unwrap_or_default())
            .details(format!("method {method}"))
            .agent(&req.agent_id),
        Utc::now(),
    )?;

    Ok(EvaluateResponse {
        decision: Decision::RequireMfa,
        session_token: None,
        challenge_id: issued.challenge_id,
        reason: format!("second factor required via {method}"),
        timeout_ms: state.config.mfa.challenge_validity_secs * 1000,
        required_method: Some(method),
        challenge_metadata: issued.user_prompt,
    })
}

/// The organizational-unit part of a DN: everything after the leaf RDN.
fn ou_of(dn: &str) -> String {
    match dn.split_once(',') {
        Some((_, rest)) => rest.trim().to_owned(),
        None => dn.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ou_extraction() {
        assert_eq!(
            ou_of("CN=alice,OU=Admins,DC=corp,DC=example"),
            "OU=Admins,DC=corp,DC=example"
        );
        assert_eq!(ou_of("CN=alice"), "CN=alice");
    }
}
