//! Agent registration, heartbeat, and certificate enrollment.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;

use mfasrv_domain::model::{AgentStatus, AgentType, AuditEvent};
use mfasrv_domain::Result;
use mfasrv_protocol::{
    EnrollCertificateRequest, EnrollCertificateResponse, HeartbeatRequest, HeartbeatResponse,
    RegisterAgentRequest, RegisterAgentResponse,
};

use super::{parse, respond, unavailable};
use crate::state::AppState;

pub async fn register(State(state): State<AppState>, body: Bytes) -> Response {
    let req: RegisterAgentRequest = match parse(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    match handle_register(&state, req) {
        Ok(resp) => respond(&resp),
        Err(e) if e.is_transient() => unavailable(e),
        Err(e) => respond(&RegisterAgentResponse {
            success: false,
            agent_id: None,
            error: Some(e.to_string()),
        }),
    }
}

fn handle_register(state: &AppState, req: RegisterAgentRequest) -> Result<RegisterAgentResponse> {
    let agent_type = AgentType::parse(&req.agent_type)?;
    if req.hostname.trim().is_empty() {
        return Ok(RegisterAgentResponse {
            success: false,
            agent_id: None,
            error: Some("hostname is required".into()),
        });
    }
    let agent = state.store.register_agent(
        req.hostname.trim(),
        agent_type,
        req.ip.as_deref(),
        req.version.as_deref(),
        Utc::now(),
    )?;
    state.store.append_audit(
        &AuditEvent::new("agent_registered", true)
            .details(format!("{} ({})", agent.hostname, agent.agent_type.as_str()))
            .agent(&agent.id),
        Utc::now(),
    )?;
    tracing::info!(agent_id = %agent.id, hostname = %agent.hostname, "agent registered");
    Ok(RegisterAgentResponse {
        success: true,
        agent_id: Some(agent.id),
        error: None,
    })
}

pub async fn heartbeat(State(state): State<AppState>, body: Bytes) -> Response {
    let req: HeartbeatRequest = match parse(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    match handle_heartbeat(&state, req) {
        Ok(resp) => respond(&resp),
        Err(e) => unavailable(e),
    }
}

fn handle_heartbeat(state: &AppState, req: HeartbeatRequest) -> Result<HeartbeatResponse> {
    // An agent coming back from offline missed stream deliveries; tell it
    // to resynchronize its policy cache from scratch.
    let was_offline = state
        .store
        .get_agent(&req.agent_id)?
        .map(|a| a.status != AgentStatus::Online)
        .unwrap_or(false);

    let known = state.store.agent_heartbeat(&req.agent_id, Utc::now())?;
    tracing::debug!(
        agent_id = %req.agent_id,
        active_sessions = req.active_sessions,
        "heartbeat"
    );
    Ok(HeartbeatResponse {
        ack: known,
        force_policy_sync: was_offline,
    })
}

pub async fn enroll_certificate(State(state): State<AppState>, body: Bytes) -> Response {
    let req: EnrollCertificateRequest = match parse(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    match handle_enroll(&state, req) {
        Ok(resp) => respond(&resp),
        Err(e) if e.is_transient() => unavailable(e),
        Err(e) => respond(&EnrollCertificateResponse {
            success: false,
            signed_cert_pem: None,
            error: Some(e.to_string()),
        }),
    }
}

fn handle_enroll(
    state: &AppState,
    req: EnrollCertificateRequest,
) -> Result<EnrollCertificateResponse> {
    let agent_type = AgentType::parse(&req.agent_type)?;
    let Some(agent) = state.store.get_agent(&req.agent_id)? else {
        return Ok(EnrollCertificateResponse {
            success: false,
            signed_cert_pem: None,
            error: Some("agent is not registered".into()),
        });
    };
    if agent.agent_type != agent_type {
        return Ok(EnrollCertificateResponse {
            success: false,
            signed_cert_pem: None,
            error: Some("agent type does not match registration".into()),
        });
    }

    let issued = state
        .ca
        .sign_csr(&req.csr_pem, state.config.ca.agent_cert_days)?;
    let superseded = state
        .store
        .set_agent_cert(&agent.id, &issued.thumbprint, &issued.serial)?;
    if let Some(old_serial) = superseded {
        // The replaced certificate must stop authenticating.
        state.ca.revoke(&old_serial, Utc::now())?;
    }
    state.store.append_audit(
        &AuditEvent::new("certificate_issued", true)
            .details(format!("serial {}", issued.serial))
            .agent(&agent.id),
        Utc::now(),
    )?;
    Ok(EnrollCertificateResponse {
        success: true,
        signed_cert_pem: Some(issued.cert_pem),
        error: None,
    })
}
