use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A registered interception agent (domain controller or endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub hostname: String,
    #[serde(default)]
    pub ip: Option<String>,
    pub status: AgentStatus,
    /// Hex SHA-256 thumbprint of the agent's current mTLS certificate.
    #[serde(default)]
    pub cert_thumbprint: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub registered: DateTime<Utc>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Dc,
    Endpoint,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Dc => "dc",
            AgentType::Endpoint => "endpoint",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "dc" => Ok(AgentType::Dc),
            "endpoint" => Ok(AgentType::Endpoint),
            other => Err(Error::Validation(format!("unknown agent type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
    Degraded,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
            AgentStatus::Degraded => "degraded",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(AgentStatus::Online),
            "offline" => Ok(AgentStatus::Offline),
            "degraded" => Ok(AgentStatus::Degraded),
            other => Err(Error::Validation(format!("unknown agent status: {other}"))),
        }
    }
}

/// The singleton leader-election row. Exactly zero or one row exists, keyed
/// `"primary"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderLease {
    pub key: String,
    pub holder_id: String,
    pub acquired: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub renewed: DateTime<Utc>,
}
