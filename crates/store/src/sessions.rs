//! Session persistence. `revoked` is monotonic: once a session leaves
//! `active` it never returns.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use mfasrv_domain::model::{Session, SessionStatus};
use mfasrv_domain::Result;

use crate::{db_err, page_bounds, parse_ts, ts, Store};

const SESSION_COLS: &str = "id, user_id, token_hash, source_ip, target_resource, \
                            verified_method, status, created, expires, dc_hint";

struct RawSession {
    id: String,
    user_id: String,
    token_hash: String,
    source_ip: String,
    target_resource: Option<String>,
    verified_method: String,
    status: String,
    created: String,
    expires: String,
    dc_hint: Option<String>,
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<RawSession> {
    Ok(RawSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token_hash: row.get(2)?,
        source_ip: row.get(3)?,
        target_resource: row.get(4)?,
        verified_method: row.get(5)?,
        status: row.get(6)?,
        created: row.get(7)?,
        expires: row.get(8)?,
        dc_hint: row.get(9)?,
    })
}

impl RawSession {
    fn into_session(self) -> Result<Session> {
        Ok(Session {
            id: self.id,
            user_id: self.user_id,
            token_hash: self.token_hash,
            source_ip: self.source_ip,
            target_resource: self.target_resource,
            verified_method: self.verified_method,
            status: SessionStatus::parse(&self.status)?,
            created: parse_ts(&self.created)?,
            expires: parse_ts(&self.expires)?,
            dc_hint: self.dc_hint,
        })
    }
}

impl Store {
    pub fn insert_session(&self, s: &Session) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, token_hash, source_ip, target_resource, \
                                       verified_method, status, created, expires, dc_hint)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    s.id,
                    s.user_id,
                    s.token_hash,
                    s.source_ip,
                    s.target_resource,
                    s.verified_method,
                    s.status.as_str(),
                    ts(s.created),
                    ts(s.expires),
                    s.dc_hint,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLS} FROM sessions WHERE id = ?1"),
                [id],
                row_to_session,
            )
            .optional()
            .map_err(db_err)?
            .map(RawSession::into_session)
            .transpose()
        })
    }

    /// Most recently created active, unexpired session for `(user, ip)`.
    pub fn find_active_session(
        &self,
        user_id: &str,
        source_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {SESSION_COLS} FROM sessions \
                     WHERE user_id = ?1 AND source_ip = ?2 AND status = 'active' \
                       AND expires > ?3 \
                     ORDER BY created DESC LIMIT 1"
                ),
                params![user_id, source_ip, ts(now)],
                row_to_session,
            )
            .optional()
            .map_err(db_err)?
            .map(RawSession::into_session)
            .transpose()
        })
    }

    /// Revoke an active session. Returns false when the session was already
    /// terminal (revocation is monotonic) or unknown.
    pub fn revoke_session(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET status = 'revoked' WHERE id = ?1 AND status = 'active'",
                    [id],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    /// Sweep: mark overdue active sessions expired.
    pub fn expire_due_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET status = 'expired' \
                 WHERE status = 'active' AND expires <= ?1",
                params![ts(now)],
            )
            .map_err(db_err)
        })
    }

    pub fn list_sessions(&self, page: u64, page_size: u64) -> Result<(u64, Vec<Session>)> {
        let (limit, offset) = page_bounds(page, page_size);
        self.with_conn(|conn| {
            let total: u64 = conn
                .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
                .map_err(db_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SESSION_COLS} FROM sessions ORDER BY created DESC LIMIT ?1 OFFSET ?2"
                ))
                .map_err(db_err)?;
            let raws = stmt
                .query_map(params![limit, offset], row_to_session)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            let list = raws
                .into_iter()
                .map(RawSession::into_session)
                .collect::<Result<_>>()?;
            Ok((total, list))
        })
    }

    pub fn active_session_count(&self, now: DateTime<Utc>) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE status = 'active' AND expires > ?1",
                params![ts(now)],
                |r| r.get(0),
            )
            .map_err(db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn sample_session(id: &str, user_id: &str, created_offset: Duration) -> Session {
        let now = Utc::now() + created_offset;
        Session {
            id: id.into(),
            user_id: user_id.into(),
            token_hash: format!("hash-{id}"),
            source_ip: "10.0.0.7".into(),
            target_resource: None,
            verified_method: "totp".into(),
            status: SessionStatus::Active,
            created: now,
            expires: now + Duration::hours(8),
            dc_hint: Some("dc1".into()),
        }
    }

    #[test]
    fn find_active_prefers_most_recent() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_session(&sample_session("s-old", "u1", Duration::minutes(-30)))
            .unwrap();
        store
            .insert_session(&sample_session("s-new", "u1", Duration::minutes(-1)))
            .unwrap();

        let found = store
            .find_active_session("u1", "10.0.0.7", Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "s-new");
        assert!(store
            .find_active_session("u1", "192.168.0.1", Utc::now())
            .unwrap()
            .is_none());
    }

    #[test]
    fn revocation_is_monotonic() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_session(&sample_session("s1", "u1", Duration::zero()))
            .unwrap();

        assert!(store.revoke_session("s1").unwrap());
        assert!(!store.revoke_session("s1").unwrap());
        // An expiry sweep does not resurrect or alter a revoked session.
        store.expire_due_sessions(Utc::now() + Duration::days(1)).unwrap();
        assert_eq!(
            store.get_session("s1").unwrap().unwrap().status,
            SessionStatus::Revoked
        );
    }

    #[test]
    fn expiry_sweep_marks_overdue_only() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_session(&sample_session("s1", "u1", Duration::hours(-9)))
            .unwrap();
        store
            .insert_session(&sample_session("s2", "u1", Duration::zero()))
            .unwrap();

        assert_eq!(store.expire_due_sessions(Utc::now()).unwrap(), 1);
        assert_eq!(
            store.get_session("s1").unwrap().unwrap().status,
            SessionStatus::Expired
        );
        assert_eq!(
            store.get_session("s2").unwrap().unwrap().status,
            SessionStatus::Active
        );
    }
}
