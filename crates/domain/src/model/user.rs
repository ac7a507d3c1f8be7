use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A directory user, externally mastered by the LDAP importer.
///
/// The only local mutation is flipping `mfa_enabled` as active enrollments
/// appear and disappear; directory attributes are never written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub directory_object_id: String,
    /// Pre-Windows-2000 logon name (`DOMAIN\sam`).
    pub sam: String,
    /// User principal name (`user@realm`).
    pub upn: String,
    pub display: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub dn: String,
    pub enabled: bool,
    pub mfa_enabled: bool,
    pub last_sync: DateTime<Utc>,
    #[serde(default)]
    pub last_auth: Option<DateTime<Utc>>,
}

/// Snapshot of a directory group membership at last sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub user_id: String,
    pub group_sid: String,
    pub group_name: String,
    pub group_dn: String,
    pub synced_at: DateTime<Utc>,
}
