//! The policy engine proper: ordered first-match evaluation.

use std::sync::Arc;

use mfasrv_domain::context::{
    normalize_method_id, AuthenticationContext, Decision, PolicyEvaluationResult,
};
use mfasrv_domain::model::{ActionType, Policy};
use mfasrv_domain::Result;
use mfasrv_store::Store;

use crate::rules::rule_matches;

/// Stateless evaluator over the central policy set.
pub struct PolicyEngine {
    store: Arc<Store>,
}

impl PolicyEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Evaluate `ctx` against the stored enabled policies. A store failure
    /// surfaces as a transient error — the caller applies its failover mode.
    pub fn evaluate(&self, ctx: &AuthenticationContext) -> Result<PolicyEvaluationResult> {
        let policies = self.store.load_enabled_policies()?;
        Ok(evaluate_policies(&policies, ctx))
    }
}

/// A policy matches iff any of its rule groups matches; a group matches iff
/// all of its rules match. A policy with no groups never matches.
pub fn policy_matches(policy: &Policy, ctx: &AuthenticationContext) -> bool {
    policy
        .rule_groups
        .iter()
        .any(|group| !group.rules.is_empty() && group.rules.iter().all(|r| rule_matches(r, ctx)))
}

/// Pure first-match walk. `policies` must already be ordered by priority
/// ascending with id breaking ties (the store query and the agent cache
/// both maintain that order).
pub fn evaluate_policies(
    policies: &[Policy],
    ctx: &AuthenticationContext,
) -> PolicyEvaluationResult {
    for policy in policies {
        if !policy_matches(policy, ctx) {
            continue;
        }
        let Some(action) = policy.actions.first() else {
            tracing::warn!(policy_id = %policy.id, "matched policy has no actions, skipping");
            continue;
        };
        let (decision, alert) = match action.action_type {
            ActionType::Allow => (Decision::Allow, false),
            ActionType::Deny => (Decision::Deny, false),
            ActionType::RequireMfa => (Decision::RequireMfa, false),
            ActionType::AlertOnly => (Decision::Allow, true),
        };
        return PolicyEvaluationResult {
            decision,
            matched_policy_id: Some(policy.id.clone()),
            matched_policy_name: Some(policy.name.clone()),
            required_method: action
                .required_method
                .as_deref()
                .map(normalize_method_id),
            failover_mode: policy.failover_mode,
            reason: if alert {
                format!("policy '{}' alert-only", policy.name)
            } else {
                format!("matched policy '{}'", policy.name)
            },
            alert,
        };
    }
    PolicyEvaluationResult::no_match()
}
