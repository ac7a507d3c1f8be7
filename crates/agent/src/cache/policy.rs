//! Local policy cache, fed by the policy stream and warmed from the local
//! store at startup. Holds enabled policies in evaluation order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use mfasrv_domain::context::{AuthenticationContext, PolicyEvaluationResult};
use mfasrv_domain::model::Policy;
use mfasrv_domain::Result;
use mfasrv_protocol::PolicyUpdate;

use crate::local_store::{LocalStore, META_LAST_SYNC};

pub struct PolicyCache {
    /// Enabled policies, sorted by (priority, id).
    policies: RwLock<Vec<Policy>>,
    store: Arc<LocalStore>,
}

impl PolicyCache {
    /// Warm from the durable cache.
    pub fn warm(store: Arc<LocalStore>) -> Result<Self> {
        let policies = store.load_policies()?;
        tracing::info!(count = policies.len(), "policy cache warmed");
        Ok(Self {
            policies: RwLock::new(policies),
            store,
        })
    }

    /// Apply one stream update: insert/replace by id, evict on delete or
    /// disable, and persist fire-and-forget.
    pub fn apply(&self, update: &PolicyUpdate) {
        if update.deleted {
            self.remove(&update.policy_id);
            if let Err(e) = self.store.delete_policy(&update.policy_id) {
                tracing::warn!(error = %e, "policy cache persistence failed; continuing in memory");
            }
            tracing::debug!(policy_id = %update.policy_id, "policy evicted");
        } else {
            let policy: Policy = match serde_json::from_str(&update.policy_json) {
                Ok(policy) => policy,
                Err(e) => {
                    tracing::warn!(policy_id = %update.policy_id, error = %e, "unparseable policy update ignored");
                    return;
                }
            };
            if let Err(e) = self.store.upsert_policy(&policy) {
                tracing::warn!(error = %e, "policy cache persistence failed; continuing in memory");
            }
            if policy.enabled {
                self.insert(policy);
            } else {
                self.remove(&update.policy_id);
            }
        }
        self.persist_watermark(update.updated_at);
    }

    /// Drop everything; the start of a full resync.
    pub fn clear(&self) {
        self.policies.write().clear();
        if let Err(e) = self.store.clear_policies() {
            tracing::warn!(error = %e, "policy cache clear failed; continuing in memory");
        }
    }

    /// Full resync: the incoming set replaces everything.
    pub fn replace_all(&self, updates: &[PolicyUpdate]) {
        self.clear();
        for update in updates {
            self.apply(update);
        }
        tracing::info!(count = updates.len(), "policy cache replaced");
    }

    fn insert(&self, policy: Policy) {
        let mut policies = self.policies.write();
        policies.retain(|p| p.id != policy.id);
        let at = policies
            .binary_search_by(|p| (p.priority, p.id.as_str()).cmp(&(policy.priority, policy.id.as_str())))
            .unwrap_or_else(|i| i);
        policies.insert(at, policy);
    }

    fn remove(&self, policy_id: &str) {
        self.policies.write().retain(|p| p.id != policy_id);
    }

    /// Evaluate against the cached set with the shared engine logic.
    pub fn evaluate(&self, ctx: &AuthenticationContext) -> PolicyEvaluationResult {
        let policies = self.policies.read();
        mfasrv_policy::evaluate_policies(&policies, ctx)
    }

    pub fn contains(&self, policy_id: &str) -> bool {
        self.policies.read().iter().any(|p| p.id == policy_id)
    }

    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }

    /// The persisted stream high-watermark.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.store
            .get_meta(META_LAST_SYNC)
            .ok()
            .flatten()
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn persist_watermark(&self, updated_at: DateTime<Utc>) {
        let newer = match self.last_sync() {
            Some(current) => updated_at > current,
            None => true,
        };
        if newer {
            if let Err(e) = self.store.set_meta(META_LAST_SYNC, &updated_at.to_rfc3339()) {
                tracing::warn!(error = %e, "watermark persistence failed");
            }
        }
    }
}
