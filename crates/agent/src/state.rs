use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use mfasrv_domain::config::AgentConfig;

use crate::cache::{PolicyCache, SessionCache};
use crate::central::CentralClient;
use crate::gossip::GossipSender;
use crate::local_store::LocalStore;

/// Context the agent remembers about an outstanding challenge so the
/// follow-up `submit_mfa`/`check_status` can cache the resulting session.
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub user_name: String,
    pub source_ip: Option<String>,
}

/// Shared state of the running agent.
#[derive(Clone)]
pub struct AgentState {
    pub config: Arc<AgentConfig>,
    pub local_store: Arc<LocalStore>,
    pub policy_cache: Arc<PolicyCache>,
    pub session_cache: Arc<SessionCache>,
    pub central: Arc<CentralClient>,
    pub gossip: Arc<GossipSender>,
    /// Agent id assigned at registration.
    pub agent_id: Arc<RwLock<String>>,
    /// Last central call outcome, for logging and the degraded path.
    pub central_reachable: Arc<AtomicBool>,
    /// Challenges issued through this agent that have not resolved yet.
    pub pending_challenges: Arc<Mutex<HashMap<String, PendingChallenge>>>,
}

impl AgentState {
    pub fn agent_id(&self) -> String {
        self.agent_id.read().clone()
    }
}
