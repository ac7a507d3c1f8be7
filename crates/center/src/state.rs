use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use mfasrv_ca::CertificateAuthority;
use mfasrv_challenge::{ChallengeOrchestrator, EnrollmentManager};
use mfasrv_domain::config::CenterConfig;
use mfasrv_methods::MethodRegistry;
use mfasrv_policy::PolicyEngine;
use mfasrv_sessions::SessionManager;
use mfasrv_store::Store;

use crate::runtime::policy_hub::PolicyStreamHub;
use crate::runtime::snapshot::Snapshotter;

/// Shared application state passed to all REST and RPC handlers.
///
/// Fields group by concern:
/// - **Core** — config, state store
/// - **Decision pipeline** — policy engine, methods, challenges, sessions
/// - **Agent plane** — CA, policy stream hub
/// - **Operations** — snapshotter, leadership flag, admin token hash
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<CenterConfig>,
    pub store: Arc<Store>,

    // ── Decision pipeline ─────────────────────────────────────────────
    pub engine: Arc<PolicyEngine>,
    pub methods: Arc<MethodRegistry>,
    pub challenges: Arc<ChallengeOrchestrator>,
    pub enrollments: Arc<EnrollmentManager>,
    pub sessions: Arc<SessionManager>,

    // ── Agent plane ───────────────────────────────────────────────────
    pub ca: Arc<CertificateAuthority>,
    pub policy_hub: Arc<PolicyStreamHub>,

    // ── Operations ────────────────────────────────────────────────────
    pub snapshotter: Arc<Snapshotter>,
    /// True while this instance holds the leader lease (always true when
    /// HA is disabled).
    pub is_leader: Arc<AtomicBool>,
    /// SHA-256 of the admin bearer token; `None` disables admin endpoints.
    pub admin_token_hash: Option<Arc<[u8; 32]>>,
    /// This instance's identifier for the leader lease.
    pub instance_id: Arc<str>,
}
