//! Prioritized rule evaluation producing an authentication decision.
//!
//! The engine is stateless across calls: every evaluation loads the enabled
//! policy set in one snapshot query, walks it in priority order, and returns
//! the first match's verdict. The pure evaluation over an already-loaded
//! policy slice is exposed separately so DC agents can run the same logic
//! over their local cache.

mod engine;
mod rules;

pub use engine::{evaluate_policies, policy_matches, PolicyEngine};
pub use rules::rule_matches;
