//! `VerifyChallenge` and `CheckChallengeStatus`. A successful verification
//! mints the bearer session and returns its token.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;

use mfasrv_domain::model::{AsyncStatus, AuditEvent, Challenge};
use mfasrv_domain::{Error, Result};
use mfasrv_protocol::{
    CheckChallengeStatusRequest, CheckChallengeStatusResponse, VerifyChallengeRequest,
    VerifyChallengeResponse,
};

use super::{parse, respond, unavailable};
use crate::metrics;
use crate::state::AppState;

pub async fn verify(State(state): State<AppState>, body: Bytes) -> Response {
    let req: VerifyChallengeRequest = match parse(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    match handle_verify(&state, req) {
        Ok(resp) => respond(&resp),
        Err(e) if e.is_transient() => unavailable(e),
        Err(e) => respond(&VerifyChallengeResponse {
            success: false,
            session_token: None,
            error: Some(e.to_string()),
        }),
    }
}

fn handle_verify(state: &AppState, req: VerifyChallengeRequest) -> Result<VerifyChallengeResponse> {
    let result = state.challenges.verify(&req.challenge_id, &req.response)?;
    let outcome = if result.success { "approved" } else { "rejected" };
    metrics::CHALLENGE_VERIFICATIONS
        .with_label_values(&[outcome])
        .inc();

    if !result.success {
        let challenge = state.store.get_challenge(&req.challenge_id)?;
        state.store.append_audit(
            &AuditEvent::new("challenge_verify_failed", false)
                .user_name(
                    challenge
                        .as_ref()
                        .map(|c| c.user_id.clone())
                        .unwrap_or_default(),
                )
                .details(result.error.clone().unwrap_or_default()),
            Utc::now(),
        )?;
        return Ok(VerifyChallengeResponse {
            success: false,
            session_token: None,
            error: result.error,
        });
    }

    let challenge = state
        .store
        .get_challenge(&req.challenge_id)?
        .ok_or_else(|| Error::NotFound(format!("challenge {}", req.challenge_id)))?;
    let token = mint_session(state, &challenge)?;
    Ok(VerifyChallengeResponse {
        success: true,
        session_token: Some(token),
        error: None,
    })
}

pub async fn status(State(state): State<AppState>, body: Bytes) -> Response {
    let req: CheckChallengeStatusRequest = match parse(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    match handle_status(&state, req).await {
        Ok(resp) => respond(&resp),
        Err(e) if e.is_transient() => unavailable(e),
        Err(e) => respond(&CheckChallengeStatusResponse {
            status: AsyncStatus::Failed,
            session_token: None,
            error: Some(e.to_string()),
        }),
    }
}

async fn handle_status(
    state: &AppState,
    req: CheckChallengeStatusRequest,
) -> Result<CheckChallengeStatusResponse> {
    let status = state.challenges.status(&req.challenge_id).await?;

    // An async approval mints the session on the poll that observes it,
    // unless one already exists for the same (user, source) pair.
    let mut session_token = None;
    if status.status == AsyncStatus::Approved {
        let challenge = state
            .store
            .get_challenge(&req.challenge_id)?
            .ok_or_else(|| Error::NotFound(format!("challenge {}", req.challenge_id)))?;
        let existing = match &challenge.source_ip {
            Some(ip) => state.sessions.find_active(&challenge.user_id, ip)?,
            None => None,
        };
        if existing.is_none() {
            session_token = Some(mint_session(state, &challenge)?);
        }
    }

    Ok(CheckChallengeStatusResponse {
        status: status.status,
        session_token,
        error: status.error,
    })
}

/// Create the bearer session for an approved challenge and audit it.
fn mint_session(state: &AppState, challenge: &Challenge) -> Result<String> {
    let issued = state.sessions.create(
        &challenge.user_id,
        challenge.source_ip.as_deref().unwrap_or(""),
        challenge.target.as_deref(),
        &challenge.method,
        None,
        None,
    )?;
    metrics::SESSIONS_CREATED.inc();
    state.store.touch_last_auth(&challenge.user_id, Utc::now())?;
    state.store.append_audit(
        &AuditEvent::new("mfa_completed", true)
            .user(&challenge.user_id, &challenge.user_id)
            .source_ip(challenge.source_ip.clone().unwrap_or_default())
            .details(format!(
                "method {}, session {}",
                challenge.method, issued.session.id
            )),
        Utc::now(),
    )?;
    Ok(issued.token)
}
