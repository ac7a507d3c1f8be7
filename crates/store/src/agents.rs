//! Agent registrations and heartbeat bookkeeping.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use mfasrv_domain::model::{AgentRegistration, AgentStatus, AgentType};
use mfasrv_domain::Result;

use crate::{db_err, page_bounds, parse_ts, parse_ts_opt, ts, Store};

const AGENT_COLS: &str =
    "id, type, hostname, ip, status, cert_thumbprint, version, registered, last_heartbeat";

struct RawAgent {
    id: String,
    agent_type: String,
    hostname: String,
    ip: Option<String>,
    status: String,
    cert_thumbprint: Option<String>,
    version: Option<String>,
    registered: String,
    last_heartbeat: Option<String>,
}

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<RawAgent> {
    Ok(RawAgent {
        id: row.get(0)?,
        agent_type: row.get(1)?,
        hostname: row.get(2)?,
        ip: row.get(3)?,
        status: row.get(4)?,
        cert_thumbprint: row.get(5)?,
        version: row.get(6)?,
        registered: row.get(7)?,
        last_heartbeat: row.get(8)?,
    })
}

impl RawAgent {
    fn into_agent(self) -> Result<AgentRegistration> {
        Ok(AgentRegistration {
            id: self.id,
            agent_type: AgentType::parse(&self.agent_type)?,
            hostname: self.hostname,
            ip: self.ip,
            status: AgentStatus::parse(&self.status)?,
            cert_thumbprint: self.cert_thumbprint,
            version: self.version,
            registered: parse_ts(&self.registered)?,
            last_heartbeat: parse_ts_opt(self.last_heartbeat)?,
        })
    }
}

impl Store {
    /// Register (or re-register) an agent. The `(hostname, type)` pair is
    /// the natural key — a reinstalled agent keeps its id.
    pub fn register_agent(
        &self,
        hostname: &str,
        agent_type: AgentType,
        ip: Option<&str>,
        version: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AgentRegistration> {
        let existing = self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {AGENT_COLS} FROM agents \
                     WHERE hostname = ?1 COLLATE NOCASE AND type = ?2"
                ),
                params![hostname, agent_type.as_str()],
                row_to_agent,
            )
            .optional()
            .map_err(db_err)
        })?;

        let id = match existing {
            Some(raw) => {
                let id = raw.id.clone();
                self.with_conn(|conn| {
                    conn.execute(
                        "UPDATE agents SET ip = ?2, version = ?3, status = 'online', \
                         last_heartbeat = ?4 WHERE id = ?1",
                        params![id, ip, version, ts(now)],
                    )
                    .map_err(db_err)?;
                    Ok(())
                })?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                self.with_conn(|conn| {
                    conn.execute(
                        "INSERT INTO agents (id, type, hostname, ip, status, version, \
                                             registered, last_heartbeat)
                         VALUES (?1, ?2, ?3, ?4, 'online', ?5, ?6, ?6)",
                        params![id, agent_type.as_str(), hostname, ip, version, ts(now)],
                    )
                    .map_err(db_err)?;
                    Ok(())
                })?;
                id
            }
        };
        self.get_agent(&id)?
            .ok_or_else(|| mfasrv_domain::Error::Store("agent vanished during register".into()))
    }

    pub fn get_agent(&self, id: &str) -> Result<Option<AgentRegistration>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {AGENT_COLS} FROM agents WHERE id = ?1"),
                [id],
                row_to_agent,
            )
            .optional()
            .map_err(db_err)?
            .map(RawAgent::into_agent)
            .transpose()
        })
    }

    pub fn list_agents(&self, page: u64, page_size: u64) -> Result<(u64, Vec<AgentRegistration>)> {
        let (limit, offset) = page_bounds(page, page_size);
        self.with_conn(|conn| {
            let total: u64 = conn
                .query_row("SELECT COUNT(*) FROM agents", [], |r| r.get(0))
                .map_err(db_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {AGENT_COLS} FROM agents ORDER BY hostname LIMIT ?1 OFFSET ?2"
                ))
                .map_err(db_err)?;
            let raws = stmt
                .query_map(params![limit, offset], row_to_agent)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            let list = raws.into_iter().map(RawAgent::into_agent).collect::<Result<_>>()?;
            Ok((total, list))
        })
    }

    /// Record a heartbeat. Returns false for unknown agents.
    pub fn agent_heartbeat(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE agents SET last_heartbeat = ?2, status = 'online' WHERE id = ?1",
                    params![id, ts(now)],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    /// Record the certificate issued to an agent. Returns the serial of the
    /// certificate it supersedes, if any, so the caller can revoke it.
    pub fn set_agent_cert(
        &self,
        id: &str,
        thumbprint: &str,
        serial: &str,
    ) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let previous: Option<String> = conn
                .query_row("SELECT cert_serial FROM agents WHERE id = ?1", [id], |r| {
                    r.get(0)
                })
                .optional()
                .map_err(db_err)?
                .flatten();
            conn.execute(
                "UPDATE agents SET cert_thumbprint = ?2, cert_serial = ?3 WHERE id = ?1",
                params![id, thumbprint, serial],
            )
            .map_err(db_err)?;
            Ok(previous)
        })
    }

    pub fn agent_cert_serial(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT cert_serial FROM agents WHERE id = ?1", [id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(db_err)
            .map(Option::flatten)
        })
    }

    /// Sweep: agents silent since `cutoff` go offline.
    pub fn mark_stale_agents_offline(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE agents SET status = 'offline' \
                 WHERE status = 'online' AND (last_heartbeat IS NULL OR last_heartbeat < ?1)",
                params![ts(cutoff)],
            )
            .map_err(db_err)
        })
    }

    pub fn deregister_agent(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM agents WHERE id = ?1", [id])
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reregistration_keeps_id() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let first = store
            .register_agent("DC1", AgentType::Dc, Some("10.0.0.2"), Some("1.0"), now)
            .unwrap();
        let second = store
            .register_agent("dc1", AgentType::Dc, Some("10.0.0.3"), Some("1.1"), now)
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.ip.as_deref(), Some("10.0.0.3"));

        // Same hostname, different type is a distinct agent.
        let endpoint = store
            .register_agent("dc1", AgentType::Endpoint, None, None, now)
            .unwrap();
        assert_ne!(endpoint.id, first.id);
    }

    #[test]
    fn cert_rotation_reports_superseded_serial() {
        let store = Store::open_in_memory().unwrap();
        let a = store
            .register_agent("dc1", AgentType::Dc, None, None, Utc::now())
            .unwrap();

        assert!(store.set_agent_cert(&a.id, "tp-1", "serial-1").unwrap().is_none());
        assert_eq!(
            store.set_agent_cert(&a.id, "tp-2", "serial-2").unwrap().as_deref(),
            Some("serial-1")
        );
        assert_eq!(
            store.agent_cert_serial(&a.id).unwrap().as_deref(),
            Some("serial-2")
        );
        assert_eq!(
            store.get_agent(&a.id).unwrap().unwrap().cert_thumbprint.as_deref(),
            Some("tp-2")
        );
    }

    #[test]
    fn stale_agents_go_offline() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let a = store
            .register_agent("dc1", AgentType::Dc, None, None, now)
            .unwrap();
        assert_eq!(
            store
                .mark_stale_agents_offline(now + chrono::Duration::minutes(5))
                .unwrap(),
            1
        );
        let got = store.get_agent(&a.id).unwrap().unwrap();
        assert_eq!(got.status, AgentStatus::Offline);

        // A heartbeat brings it back online.
        assert!(store
            .agent_heartbeat(&a.id, now + chrono::Duration::minutes(6))
            .unwrap());
        assert_eq!(
            store.get_agent(&a.id).unwrap().unwrap().status,
            AgentStatus::Online
        );
    }
}
