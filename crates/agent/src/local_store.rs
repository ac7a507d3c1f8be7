//! The agent's durable cache: one SQLite file, WAL journaling,
//! normal-synchronous fsync. Crash restart warms both in-memory caches from
//! here; persistence during operation is fire-and-forget.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use mfasrv_domain::model::{CachedSession, Policy};
use mfasrv_domain::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cached_policies (
    policy_id     TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    json          TEXT NOT NULL,
    failover_mode TEXT NOT NULL,
    priority      INTEGER NOT NULL,
    enabled       INTEGER NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cached_sessions (
    session_id      TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    user_name       TEXT NOT NULL,
    source_ip       TEXT NOT NULL,
    expires_at      TEXT NOT NULL,
    verified_method TEXT NOT NULL,
    revoked         INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS cache_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

pub const META_LAST_SYNC: &str = "policy_last_sync";
pub const META_AGENT_ID: &str = "agent_id";

pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(db_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5)).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        tracing::info!(path = %path.display(), "local cache store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Policies ─────────────────────────────────────────────────────

    pub fn upsert_policy(&self, policy: &Policy) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cached_policies (policy_id, name, json, failover_mode, priority, \
                                          enabled, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(policy_id) DO UPDATE SET
                 name = excluded.name, json = excluded.json,
                 failover_mode = excluded.failover_mode, priority = excluded.priority,
                 enabled = excluded.enabled, updated_at = excluded.updated_at",
            params![
                policy.id,
                policy.name,
                serde_json::to_string(policy)?,
                policy.failover_mode.as_str(),
                policy.priority,
                policy.enabled,
                ts(policy.updated),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn delete_policy(&self, policy_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM cached_policies WHERE policy_id = ?1",
            [policy_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn clear_policies(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cached_policies", []).map_err(db_err)?;
        Ok(())
    }

    /// Enabled policies in evaluation order, parsed from their JSON column.
    pub fn load_policies(&self) -> Result<Vec<Policy>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT json FROM cached_policies WHERE enabled = 1 \
                 ORDER BY priority, policy_id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(Error::from))
            .collect()
    }

    // ── Sessions ─────────────────────────────────────────────────────

    pub fn upsert_session(&self, session: &CachedSession) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cached_sessions (session_id, user_id, user_name, source_ip, \
                                          expires_at, verified_method, revoked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(session_id) DO UPDATE SET
                 user_id = excluded.user_id, user_name = excluded.user_name,
                 source_ip = excluded.source_ip, expires_at = excluded.expires_at,
                 verified_method = excluded.verified_method, revoked = excluded.revoked",
            params![
                session.session_id,
                session.user_id,
                session.user_name,
                session.source_ip,
                ts(session.expires_at),
                session.verified_method,
                session.revoked,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Load warm sessions: expired and revoked rows are skipped.
    pub fn load_sessions(&self, now: DateTime<Utc>) -> Result<Vec<CachedSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT session_id, user_id, user_name, source_ip, expires_at, \
                        verified_method, revoked \
                 FROM cached_sessions WHERE revoked = 0 AND expires_at > ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([ts(now)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter()
            .map(
                |(session_id, user_id, user_name, source_ip, expires_at, verified_method, revoked)| {
                    Ok(CachedSession {
                        session_id,
                        user_id,
                        user_name,
                        source_ip,
                        expires_at: parse_ts(&expires_at)?,
                        verified_method,
                        revoked,
                    })
                },
            )
            .collect()
    }

    /// Periodic cleanup: drop expired and revoked rows.
    pub fn cleanup_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM cached_sessions WHERE revoked = 1 OR expires_at <= ?1",
            [ts(now)],
        )
        .map_err(db_err)
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM cache_metadata WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cache_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(id: &str, expires_in: Duration, revoked: bool) -> CachedSession {
        CachedSession {
            session_id: id.into(),
            user_id: "u1".into(),
            user_name: "alice".into(),
            source_ip: "10.0.0.7".into(),
            expires_at: Utc::now() + expires_in,
            verified_method: "totp".into(),
            revoked,
        }
    }

    #[test]
    fn session_load_filters_dead_rows() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert_session(&session("live", Duration::hours(1), false)).unwrap();
        store.upsert_session(&session("gone", Duration::hours(-1), false)).unwrap();
        store.upsert_session(&session("revoked", Duration::hours(1), true)).unwrap();

        let loaded = store.load_sessions(Utc::now()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].session_id, "live");

        assert_eq!(store.cleanup_sessions(Utc::now()).unwrap(), 2);
    }

    #[test]
    fn metadata_round_trip() {
        let store = LocalStore::open_in_memory().unwrap();
        assert!(store.get_meta(META_LAST_SYNC).unwrap().is_none());
        store.set_meta(META_LAST_SYNC, "2025-03-01T00:00:00Z").unwrap();
        store.set_meta(META_LAST_SYNC, "2025-03-02T00:00:00Z").unwrap();
        assert_eq!(
            store.get_meta(META_LAST_SYNC).unwrap().as_deref(),
            Some("2025-03-02T00:00:00Z")
        );
    }
}
