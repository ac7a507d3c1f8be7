//! Table definitions. `migrate` is idempotent and runs at every open.

use rusqlite::Connection;

use mfasrv_domain::Result;

use crate::db_err;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                  TEXT PRIMARY KEY,
    directory_object_id TEXT NOT NULL,
    sam                 TEXT NOT NULL,
    upn                 TEXT NOT NULL,
    display             TEXT NOT NULL,
    email               TEXT,
    phone               TEXT,
    dn                  TEXT NOT NULL,
    enabled             INTEGER NOT NULL,
    mfa_enabled         INTEGER NOT NULL DEFAULT 0,
    last_sync           TEXT NOT NULL,
    last_auth           TEXT
);
CREATE INDEX IF NOT EXISTS idx_users_sam ON users(sam COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_users_upn ON users(upn COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS group_memberships (
    user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    group_sid  TEXT NOT NULL,
    group_name TEXT NOT NULL,
    group_dn   TEXT NOT NULL,
    synced_at  TEXT NOT NULL,
    PRIMARY KEY (user_id, group_sid)
);

CREATE TABLE IF NOT EXISTS enrollments (
    id                TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    method            TEXT NOT NULL,
    status            TEXT NOT NULL,
    encrypted_secret  BLOB NOT NULL,
    secret_nonce      BLOB NOT NULL,
    device_identifier TEXT,
    friendly_name     TEXT,
    created           TEXT NOT NULL,
    activated         TEXT,
    last_used         TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_one_active
    ON enrollments(user_id, method) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_enrollments_user ON enrollments(user_id);

CREATE TABLE IF NOT EXISTS policies (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    description   TEXT,
    enabled       INTEGER NOT NULL,
    priority      INTEGER NOT NULL,
    failover_mode TEXT NOT NULL,
    rule_groups   TEXT NOT NULL,
    actions       TEXT NOT NULL,
    updated       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_policies_priority ON policies(priority, id);

CREATE TABLE IF NOT EXISTS challenges (
    id            TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL,
    enrollment_id TEXT NOT NULL,
    method        TEXT NOT NULL,
    status        TEXT NOT NULL,
    source_ip     TEXT,
    target        TEXT,
    attempts      INTEGER NOT NULL DEFAULT 0,
    max_attempts  INTEGER NOT NULL,
    method_state  TEXT,
    created       TEXT NOT NULL,
    expires       TEXT NOT NULL,
    responded     TEXT
);
CREATE INDEX IF NOT EXISTS idx_challenges_user ON challenges(user_id, status);

CREATE TABLE IF NOT EXISTS sessions (
    id              TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    token_hash      TEXT NOT NULL,
    source_ip       TEXT NOT NULL,
    target_resource TEXT,
    verified_method TEXT NOT NULL,
    status          TEXT NOT NULL,
    created         TEXT NOT NULL,
    expires         TEXT NOT NULL,
    dc_hint         TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, status);
CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires);

CREATE TABLE IF NOT EXISTS agents (
    id              TEXT PRIMARY KEY,
    type            TEXT NOT NULL,
    hostname        TEXT NOT NULL,
    ip              TEXT,
    status          TEXT NOT NULL,
    cert_thumbprint TEXT,
    cert_serial     TEXT,
    version         TEXT,
    registered      TEXT NOT NULL,
    last_heartbeat  TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_agents_host ON agents(hostname COLLATE NOCASE, type);

CREATE TABLE IF NOT EXISTS leader_lease (
    key       TEXT PRIMARY KEY,
    holder_id TEXT NOT NULL,
    acquired  TEXT NOT NULL,
    expires   TEXT NOT NULL,
    renewed   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    ts         TEXT NOT NULL,
    ts_ms      INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    user_id    TEXT,
    user_name  TEXT,
    source_ip  TEXT,
    target     TEXT,
    success    INTEGER NOT NULL,
    details    TEXT,
    agent_id   TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_log(ts_ms);
CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_log(user_id);

CREATE TABLE IF NOT EXISTS restore_tokens (
    token     TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    expires   TEXT NOT NULL
);
"#;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA).map_err(db_err)
}
