//! Wires the configuration into a running [`AppState`].

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;
use sha2::{Digest, Sha256};

use mfasrv_ca::{generate_csr, CertificateAuthority};
use mfasrv_challenge::{ChallengeOrchestrator, EnrollmentManager};
use mfasrv_crypto::{key_from_env, SecretBox, TokenCodec};
use mfasrv_domain::config::{CenterConfig, TlsConfig};
use mfasrv_methods::{EmailOtpMethod, MethodRegistry, TotpMethod, TracingOtpSender};
use mfasrv_policy::PolicyEngine;
use mfasrv_sessions::SessionManager;
use mfasrv_store::Store;

use crate::runtime::policy_hub::PolicyStreamHub;
use crate::runtime::snapshot::Snapshotter;
use crate::state::AppState;

pub fn build_state(config: CenterConfig) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

    // ── Keys ─────────────────────────────────────────────────────────
    let signing_key = key_from_env(&config.security.signing_key_env)
        .context("loading session signing key")?;
    let encryption_key = key_from_env(&config.security.encryption_key_env)
        .context("loading secret encryption key")?;

    // ── State store ──────────────────────────────────────────────────
    let store = Arc::new(Store::open(&config.store.path).context("opening state store")?);

    // ── Decision pipeline ────────────────────────────────────────────
    let mut registry = MethodRegistry::new();
    registry.register(Arc::new(TotpMethod::new(config.mfa.totp_issuer.clone())));
    registry.register(Arc::new(EmailOtpMethod::new(Arc::new(TracingOtpSender))));
    let methods = Arc::new(registry);
    tracing::info!(methods = methods.len(), "MFA methods registered");

    let secrets = SecretBox::new(encryption_key);
    let engine = Arc::new(PolicyEngine::new(store.clone()));
    let challenges = Arc::new(ChallengeOrchestrator::new(
        store.clone(),
        methods.clone(),
        secrets.clone(),
        Duration::seconds(config.mfa.challenge_validity_secs as i64),
        config.mfa.challenge_max_attempts,
    ));
    let enrollments = Arc::new(EnrollmentManager::new(
        store.clone(),
        methods.clone(),
        secrets,
    ));
    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        TokenCodec::new(signing_key),
        Duration::seconds(config.mfa.session_ttl_secs as i64),
    ));

    // ── Agent plane ──────────────────────────────────────────────────
    let ca = Arc::new(CertificateAuthority::open(&config.ca.dir).context("opening CA")?);
    let policy_hub = Arc::new(PolicyStreamHub::new());

    // ── Operations ───────────────────────────────────────────────────
    let snapshotter = Arc::new(Snapshotter::new(store.clone(), config.backup.clone()));
    let admin_token_hash = std::env::var(&config.server.admin_token_env)
        .ok()
        .filter(|t| !t.is_empty())
        .map(|token| {
            let digest: [u8; 32] = Sha256::digest(token.as_bytes()).into();
            Arc::new(digest)
        });
    if admin_token_hash.is_none() {
        tracing::warn!(
            env = %config.server.admin_token_env,
            "admin token unset — administrative endpoints are disabled"
        );
    }
    let instance_id: Arc<str> = if config.ha.instance_id.is_empty() {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "mfasrv-center".into());
        format!("{host}-{}", std::process::id()).into()
    } else {
        config.ha.instance_id.clone().into()
    };

    Ok(AppState {
        config,
        store,
        engine,
        methods,
        challenges,
        enrollments,
        sessions,
        ca,
        policy_hub,
        snapshotter,
        is_leader: Arc::new(AtomicBool::new(false)),
        admin_token_hash,
        instance_id,
    })
}

/// Resolve the plane's TLS material, provisioning it from the CA on first
/// start: empty paths default into the CA directory, and missing files are
/// issued and written there.
pub fn ensure_plane_tls(state: &AppState) -> anyhow::Result<TlsConfig> {
    let config = &state.config;
    let mut tls = config.plane.tls.clone();
    if tls.cert_path.as_os_str().is_empty() {
        tls.cert_path = config.ca.dir.join("plane_cert.pem");
    }
    if tls.key_path.as_os_str().is_empty() {
        tls.key_path = config.ca.dir.join("plane_key.pem");
    }
    if tls.ca_path.as_os_str().is_empty() {
        tls.ca_path = config.ca.dir.join("ca_cert.pem");
    }

    if !tls.cert_path.is_file() || !tls.key_path.is_file() {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
        let (csr_pem, key_pem) =
            generate_csr(&host, &[host.clone(), "localhost".into()])
                .context("generating plane CSR")?;
        let issued = state
            .ca
            .sign_csr(&csr_pem, config.ca.agent_cert_days)
            .context("signing plane certificate")?;
        std::fs::write(&tls.cert_path, issued.cert_pem)?;
        std::fs::write(&tls.key_path, key_pem)?;
        tracing::info!(
            cert = %tls.cert_path.display(),
            "plane certificate provisioned from CA"
        );
    }
    Ok(tls)
}
