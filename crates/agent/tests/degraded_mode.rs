//! Degraded-path behavior with the center unreachable: fail-open,
//! fail-close, cached-only with and without a warm session, and gossip
//! convergence of the local session cache.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};

use mfasrv_agent::cache::{PolicyCache, SessionCache};
use mfasrv_agent::central::CentralClient;
use mfasrv_agent::decision::{AuthQuery, DecisionService};
use mfasrv_agent::gossip::GossipSender;
use mfasrv_agent::local_store::LocalStore;
use mfasrv_agent::state::AgentState;
use mfasrv_domain::config::AgentConfig;
use mfasrv_domain::context::Decision;
use mfasrv_domain::model::FailoverMode;
use mfasrv_protocol::SessionEvent;

fn state_with(failover_mode: FailoverMode) -> AgentState {
    let mut config = AgentConfig::default();
    // Nothing listens here: every central call fails fast.
    config.center_url = "https://127.0.0.1:1".into();
    config.failover_mode = failover_mode;
    let config = Arc::new(config);

    let local_store = Arc::new(LocalStore::open_in_memory().unwrap());
    AgentState {
        config: config.clone(),
        local_store: local_store.clone(),
        policy_cache: Arc::new(PolicyCache::warm(local_store.clone()).unwrap()),
        session_cache: Arc::new(SessionCache::warm(local_store).unwrap()),
        central: Arc::new(CentralClient::new(&config).unwrap()),
        gossip: Arc::new(GossipSender::new(&[], reqwest::Client::new())),
        agent_id: Arc::new(RwLock::new("dc-test".into())),
        central_reachable: Arc::new(AtomicBool::new(false)),
        pending_challenges: Arc::new(Mutex::new(HashMap::new())),
    }
}

fn query(user: &str) -> AuthQuery {
    AuthQuery {
        user_name: user.into(),
        domain: "CORP".into(),
        source_ip: Some("10.0.0.7".into()),
        protocol: "kerberos".into(),
    }
}

fn cached_session_for(user: &str, minutes_old: i64) -> SessionEvent {
    let now = Utc::now();
    SessionEvent {
        session_id: format!("s-{user}"),
        user_id: format!("u-{user}"),
        user_name: user.into(),
        source_ip: "10.0.0.7".into(),
        verified_method: "totp".into(),
        expires: now + Duration::hours(8) - Duration::minutes(minutes_old),
        revoked: false,
        origin_id: "dc-a".into(),
        timestamp: now - Duration::minutes(minutes_old),
    }
}

#[tokio::test]
async fn fail_open_allows_when_central_is_down() {
    let state = state_with(FailoverMode::FailOpen);
    let service = DecisionService::new(state);

    let response = service.preauth(query("alice")).await;
    assert!(response.allow);
    assert_eq!(response.decision, Decision::Allow);
    assert!(response.reason.unwrap().contains("fail-open"));
}

#[tokio::test]
async fn fail_close_denies_when_central_is_down() {
    let state = state_with(FailoverMode::FailClose);
    let service = DecisionService::new(state);

    let response = service.preauth(query("alice")).await;
    assert!(!response.allow);
    assert_eq!(response.decision, Decision::Deny);
}

#[tokio::test]
async fn cached_only_allows_holders_and_denies_strangers() {
    let state = state_with(FailoverMode::CachedOnly);
    // Alice completed MFA ten minutes ago; the session is cached locally.
    state
        .session_cache
        .apply_event(&cached_session_for("alice", 10));
    let service = DecisionService::new(state);

    let alice = service.preauth(query("alice")).await;
    assert!(alice.allow);
    assert_eq!(alice.reason.as_deref(), Some("cached session"));

    let mallory = service.preauth(query("mallory")).await;
    assert!(!mallory.allow);
    assert!(mallory.reason.unwrap().contains("no cached session"));
}

#[tokio::test]
async fn cached_session_short_circuits_before_central() {
    // Even with fail-close configured, a live cached session allows
    // without touching the (dead) center.
    let state = state_with(FailoverMode::FailClose);
    state
        .session_cache
        .apply_event(&cached_session_for("alice", 1));
    let service = DecisionService::new(state);

    let response = service.preauth(query("alice")).await;
    assert!(response.allow);
    assert_eq!(response.reason.as_deref(), Some("cached session"));
}

#[test]
fn gossip_revocation_wins_and_stale_create_is_ignored() {
    let state = state_with(FailoverMode::FailOpen);
    let created = cached_session_for("alice", 0);
    assert!(state.session_cache.apply_event(&created));

    let mut revoked = created.clone();
    revoked.revoked = true;
    revoked.timestamp = created.timestamp + Duration::seconds(1);
    assert!(state.session_cache.apply_event(&revoked));

    // A replayed create with an earlier timestamp does not resurrect it.
    let mut replay = created.clone();
    replay.timestamp = created.timestamp - Duration::seconds(5);
    assert!(!state.session_cache.apply_event(&replay));
    assert!(state
        .session_cache
        .find("alice", Some("10.0.0.7"), Utc::now())
        .is_none());
}
