//! End-to-end decision flow over the RPC surface: policy match, challenge
//! issue, code verification, session creation, cached-session allow, and
//! attempt lockout.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tower::ServiceExt;

use mfasrv_ca::CertificateAuthority;
use mfasrv_center::runtime::policy_hub::PolicyStreamHub;
use mfasrv_center::runtime::snapshot::Snapshotter;
use mfasrv_center::state::AppState;
use mfasrv_center::rpc;
use mfasrv_challenge::{ChallengeOrchestrator, EnrollmentManager};
use mfasrv_crypto::{SecretBox, TokenCodec};
use mfasrv_domain::config::{BackupConfig, CenterConfig};
use mfasrv_domain::context::Decision;
use mfasrv_domain::model::{
    ActionType, FailoverMode, GroupMembership, Policy, PolicyAction, Rule, RuleGroup,
    RuleOperator, RuleType, User,
};
use mfasrv_domain::Result;
use mfasrv_methods::{EmailOtpMethod, MethodRegistry, OtpSender, TotpMethod};
use mfasrv_policy::PolicyEngine;
use mfasrv_protocol::{
    decode_message, encode_message, EvaluateRequest, EvaluateResponse, VerifyChallengeRequest,
    VerifyChallengeResponse,
};
use mfasrv_sessions::SessionManager;
use mfasrv_store::Store;

const DOMAIN_ADMINS: &str = "S-1-5-21-1111-2222-3333-512";

/// Captures OTP deliveries so the test can answer challenges.
struct CapturingSender {
    codes: Mutex<Vec<String>>,
}

#[async_trait]
impl OtpSender for CapturingSender {
    async fn deliver(&self, _destination: &str, code: &str) -> Result<()> {
        self.codes.lock().push(code.to_owned());
        Ok(())
    }
}

struct Fixture {
    state: AppState,
    sender: Arc<CapturingSender>,
    _ca_dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let secrets = SecretBox::new([7u8; 32]);
    let sender = Arc::new(CapturingSender {
        codes: Mutex::new(Vec::new()),
    });

    let mut registry = MethodRegistry::new();
    registry.register(Arc::new(TotpMethod::new("mfasrv".into())));
    registry.register(Arc::new(EmailOtpMethod::new(sender.clone())));
    let methods = Arc::new(registry);

    let config = Arc::new(CenterConfig::default());
    let ca_dir = tempfile::tempdir().unwrap();
    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        engine: Arc::new(PolicyEngine::new(store.clone())),
        methods: methods.clone(),
        challenges: Arc::new(ChallengeOrchestrator::new(
            store.clone(),
            methods.clone(),
            secrets.clone(),
            Duration::minutes(5),
            3,
        )),
        enrollments: Arc::new(EnrollmentManager::new(
            store.clone(),
            methods.clone(),
            secrets,
        )),
        sessions: Arc::new(SessionManager::new(
            store.clone(),
            TokenCodec::new([8u8; 32]),
            Duration::hours(8),
        )),
        ca: Arc::new(CertificateAuthority::open(ca_dir.path()).unwrap()),
        policy_hub: Arc::new(PolicyStreamHub::new()),
        snapshotter: Arc::new(Snapshotter::new(
            store.clone(),
            BackupConfig {
                root: ca_dir.path().join("backups"),
                interval_hours: 6,
                retain: 3,
            },
        )),
        is_leader: Arc::new(AtomicBool::new(true)),
        admin_token_hash: None,
        instance_id: Arc::from("test-instance"),
    };

    seed(&state);
    Fixture {
        state,
        sender,
        _ca_dir: ca_dir,
    }
}

fn seed(state: &AppState) {
    let now = Utc::now();
    state
        .store
        .upsert_user(&User {
            id: "u-alice".into(),
            directory_object_id: "obj-1".into(),
            sam: "alice".into(),
            upn: "alice@corp.example".into(),
            display: "Alice".into(),
            email: Some("alice@corp.example".into()),
            phone: None,
            dn: "CN=alice,OU=Admins,DC=corp,DC=example".into(),
            enabled: true,
            mfa_enabled: false,
            last_sync: now,
            last_auth: None,
        })
        .unwrap();
    state
        .store
        .replace_group_memberships(
            "u-alice",
            &[GroupMembership {
                user_id: "u-alice".into(),
                group_sid: DOMAIN_ADMINS.into(),
                group_name: "Domain Admins".into(),
                group_dn: "CN=Domain Admins".into(),
                synced_at: now,
            }],
        )
        .unwrap();
    state
        .store
        .insert_policy(&Policy {
            id: "p-admins".into(),
            name: "Require MFA for Domain Admins".into(),
            description: None,
            enabled: true,
            priority: 10,
            failover_mode: FailoverMode::CachedOnly,
            rule_groups: vec![RuleGroup {
                id: "g0".into(),
                policy_id: "p-admins".into(),
                order: 0,
                rules: vec![Rule {
                    rule_type: RuleType::SourceGroup,
                    operator: RuleOperator::Equals,
                    value: DOMAIN_ADMINS.into(),
                    negate: false,
                }],
            }],
            actions: vec![PolicyAction {
                action_type: ActionType::RequireMfa,
                required_method: Some("email_otp".into()),
            }],
            updated: now,
        })
        .unwrap();
}

/// Enroll and activate the e-mail OTP method for alice.
fn enroll_alice(fixture: &Fixture) {
    let started = fixture
        .state
        .enrollments
        .begin("u-alice", "email_otp", None, None)
        .unwrap();
    // The activation code travels inside the sealed secret; recover it the
    // way the admin UI would show it to the user.
    let row = fixture
        .state
        .store
        .get_enrollment(&started.enrollment.id)
        .unwrap()
        .unwrap();
    let secret = SecretBox::new([7u8; 32])
        .open(&row.encrypted_secret, &row.secret_nonce)
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&secret).unwrap();
    fixture
        .state
        .enrollments
        .activate(&started.enrollment.id, parsed["activation"].as_str().unwrap())
        .unwrap();
}

async fn rpc_call<Req, Resp>(state: &AppState, path: &str, req: &Req) -> Resp
where
    Req: serde::Serialize,
    Resp: serde::de::DeserializeOwned,
{
    let response = rpc::router()
        .with_state(state.clone())
        .oneshot(
            Request::post(path)
                .body(Body::from(encode_message(req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK, "RPC {path} failed");
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    decode_message(&bytes).unwrap()
}

fn evaluate_request() -> EvaluateRequest {
    EvaluateRequest {
        user_name: "alice".into(),
        domain: "CORP".into(),
        source_ip: Some("10.0.0.7".into()),
        protocol: "kerberos".into(),
        agent_id: "dc-1".into(),
    }
}

#[tokio::test]
async fn mfa_happy_path_then_cached_session() {
    let fixture = fixture();
    enroll_alice(&fixture);

    // Logon hits the Domain Admins policy: second factor required.
    let eval: EvaluateResponse =
        rpc_call(&fixture.state, "/rpc/v1/evaluate", &evaluate_request()).await;
    assert_eq!(eval.decision, Decision::RequireMfa);
    assert_eq!(eval.required_method.as_deref(), Some("email_otp"));
    let challenge_id = eval.challenge_id.expect("challenge issued");
    assert_eq!(eval.timeout_ms, 300_000);

    // Answer with the delivered code.
    let code = fixture.sender.codes.lock().last().unwrap().clone();
    let verified: VerifyChallengeResponse = rpc_call(
        &fixture.state,
        "/rpc/v1/verify_challenge",
        &VerifyChallengeRequest {
            challenge_id,
            response: code,
        },
    )
    .await;
    assert!(verified.success, "{:?}", verified.error);
    let token = verified.session_token.expect("session minted");

    // The token the center minted validates against the session row.
    let session = fixture.state.sessions.validate(&token).unwrap().unwrap();
    assert_eq!(session.user_id, "u-alice");

    // A repeated logon inside the TTL is allowed by the active session,
    // with no second challenge. The response carries the re-derived token
    // of that session so a cold agent cache can re-adopt it.
    let again: EvaluateResponse =
        rpc_call(&fixture.state, "/rpc/v1/evaluate", &evaluate_request()).await;
    assert_eq!(again.decision, Decision::Allow);
    assert!(again.reason.contains("active session"));
    assert!(again.challenge_id.is_none());
    let reissued = again.session_token.expect("existing session token rides the allow");
    assert_eq!(reissued, token);
    assert!(fixture.state.sessions.validate(&reissued).unwrap().is_some());
}

#[tokio::test]
async fn three_wrong_codes_lock_the_challenge() {
    let fixture = fixture();
    enroll_alice(&fixture);

    let eval: EvaluateResponse =
        rpc_call(&fixture.state, "/rpc/v1/evaluate", &evaluate_request()).await;
    let challenge_id = eval.challenge_id.expect("challenge issued");
    let good_code = fixture.sender.codes.lock().last().unwrap().clone();
    let wrong = if good_code == "000000" { "111111" } else { "000000" };

    for _ in 0..3 {
        let verified: VerifyChallengeResponse = rpc_call(
            &fixture.state,
            "/rpc/v1/verify_challenge",
            &VerifyChallengeRequest {
                challenge_id: challenge_id.clone(),
                response: wrong.into(),
            },
        )
        .await;
        assert!(!verified.success);
        assert!(verified.session_token.is_none());
    }

    // The fourth attempt — even with the right code — stays rejected.
    let verified: VerifyChallengeResponse = rpc_call(
        &fixture.state,
        "/rpc/v1/verify_challenge",
        &VerifyChallengeRequest {
            challenge_id,
            response: good_code,
        },
    )
    .await;
    assert!(!verified.success);
    assert_eq!(verified.error.as_deref(), Some("attempts exhausted"));
}

#[tokio::test]
async fn user_without_policy_match_is_allowed() {
    let fixture = fixture();
    let now = Utc::now();
    fixture
        .state
        .store
        .upsert_user(&User {
            id: "u-bob".into(),
            directory_object_id: "obj-2".into(),
            sam: "bob".into(),
            upn: "bob@corp.example".into(),
            display: "Bob".into(),
            email: None,
            phone: None,
            dn: "CN=bob,OU=Users,DC=corp,DC=example".into(),
            enabled: true,
            mfa_enabled: false,
            last_sync: now,
            last_auth: None,
        })
        .unwrap();

    let mut req = evaluate_request();
    req.user_name = "bob".into();
    let eval: EvaluateResponse = rpc_call(&fixture.state, "/rpc/v1/evaluate", &req).await;
    assert_eq!(eval.decision, Decision::Allow);
    assert_eq!(eval.reason, "no matching policy");
}
