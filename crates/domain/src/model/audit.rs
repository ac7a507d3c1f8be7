use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One append-only audit record. Rows are never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Monotonic sequence assigned by the store.
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// A new audit record before the store assigns its sequence number.
#[derive(Debug, Clone, Default)]
pub struct AuditEvent {
    pub event_type: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub source_ip: Option<String>,
    pub target: Option<String>,
    pub success: bool,
    pub details: Option<String>,
    pub agent_id: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: impl Into<String>, success: bool) -> Self {
        Self {
            event_type: event_type.into(),
            success,
            ..Default::default()
        }
    }

    pub fn user(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self.user_name = Some(name.into());
        self
    }

    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}
