use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An administrator-defined authentication policy.
///
/// Evaluation order across policies is `priority` ascending — the lowest
/// numeric value wins. Rule groups combine by OR; rules within a group by
/// AND. The first action of the first matching policy is dispositive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub enabled: bool,
    pub priority: i64,
    pub failover_mode: FailoverMode,
    #[serde(default)]
    pub rule_groups: Vec<RuleGroup>,
    #[serde(default)]
    pub actions: Vec<PolicyAction>,
    pub updated: DateTime<Utc>,
}

/// A conjunction of rules inside a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
    pub id: String,
    pub policy_id: String,
    pub order: i64,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One predicate over the authentication context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_type: RuleType,
    pub operator: RuleOperator,
    pub value: String,
    #[serde(default)]
    pub negate: bool,
}

/// One action a matching policy dispenses. Only the first is dispositive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAction {
    pub action_type: ActionType,
    #[serde(default)]
    pub required_method: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which part of the authentication context a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    SourceUser,
    SourceGroup,
    SourceIp,
    SourceOu,
    TargetResource,
    AuthProtocol,
    TimeWindow,
    /// No scorer produces this input yet; rules of this type never match.
    RiskScore,
}

/// String comparison applied by a rule. All string operators compare
/// case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

/// Decision a policy dispenses when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    RequireMfa,
    Deny,
    Allow,
    /// Allow, but record an alert on the audit side.
    AlertOnly,
}

/// What an agent does when the central control plane is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailoverMode {
    #[default]
    FailOpen,
    FailClose,
    CachedOnly,
}

impl FailoverMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverMode::FailOpen => "fail_open",
            FailoverMode::FailClose => "fail_close",
            FailoverMode::CachedOnly => "cached_only",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "fail_open" => Ok(FailoverMode::FailOpen),
            "fail_close" => Ok(FailoverMode::FailClose),
            "cached_only" => Ok(FailoverMode::CachedOnly),
            other => Err(Error::Validation(format!("unknown failover mode: {other}"))),
        }
    }
}

impl std::fmt::Display for FailoverMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
