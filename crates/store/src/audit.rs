//! Append-only audit log. No update or delete path exists on purpose.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use mfasrv_domain::model::{AuditEvent, AuditLogEntry};
use mfasrv_domain::Result;

use crate::{db_err, page_bounds, parse_ts, ts, Store};

/// Filters for the audit query surface. All fields are optional and AND-ed.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: u64,
    pub page_size: u64,
}

/// One hour-since-epoch bucket of audit activity.
#[derive(Debug, Clone, Serialize)]
pub struct AuditHourBucket {
    /// Start of the bucket (RFC 3339, whole hour).
    pub hour: DateTime<Utc>,
    pub total: u64,
    pub failures: u64,
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<(AuditLogEntry, String)> {
    Ok((
        AuditLogEntry {
            seq: row.get(0)?,
            ts: DateTime::<Utc>::MIN_UTC,
            event_type: row.get(2)?,
            user_id: row.get(3)?,
            user_name: row.get(4)?,
            source_ip: row.get(5)?,
            target: row.get(6)?,
            success: row.get(7)?,
            details: row.get(8)?,
            agent_id: row.get(9)?,
        },
        row.get::<_, String>(1)?,
    ))
}

impl Store {
    /// Append a record; returns the assigned sequence number.
    pub fn append_audit(&self, event: &AuditEvent, now: DateTime<Utc>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_log (ts, ts_ms, event_type, user_id, user_name, source_ip, \
                                        target, success, details, agent_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    ts(now),
                    now.timestamp_millis(),
                    event.event_type,
                    event.user_id,
                    event.user_name,
                    event.source_ip,
                    event.target,
                    event.success,
                    event.details,
                    event.agent_id,
                ],
            )
            .map_err(db_err)?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn query_audit(&self, q: &AuditQuery) -> Result<(u64, Vec<AuditLogEntry>)> {
        let (limit, offset) = page_bounds(q.page, q.page_size);
        let mut wheres: Vec<String> = Vec::new();
        let mut args: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(ref user_id) = q.user_id {
            args.push(user_id.clone().into());
            wheres.push(format!("user_id = ?{}", args.len()));
        }
        if let Some(ref event_type) = q.event_type {
            args.push(event_type.clone().into());
            wheres.push(format!("event_type = ?{}", args.len()));
        }
        if let Some(from) = q.from {
            args.push(from.timestamp_millis().into());
            wheres.push(format!("ts_ms >= ?{}", args.len()));
        }
        if let Some(to) = q.to {
            args.push(to.timestamp_millis().into());
            wheres.push(format!("ts_ms < ?{}", args.len()));
        }
        let where_clause = if wheres.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", wheres.join(" AND "))
        };

        self.with_conn(|conn| {
            let total: u64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM audit_log {where_clause}"),
                    rusqlite::params_from_iter(args.iter()),
                    |r| r.get(0),
                )
                .map_err(db_err)?;

            let mut page_args = args.clone();
            page_args.push(limit.into());
            page_args.push(offset.into());
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT seq, ts, event_type, user_id, user_name, source_ip, target, \
                            success, details, agent_id \
                     FROM audit_log {where_clause} ORDER BY seq DESC \
                     LIMIT ?{} OFFSET ?{}",
                    page_args.len() - 1,
                    page_args.len()
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(page_args.iter()), row_to_entry)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            let entries = rows
                .into_iter()
                .map(|(mut entry, raw_ts)| {
                    entry.ts = parse_ts(&raw_ts)?;
                    Ok(entry)
                })
                .collect::<Result<_>>()?;
            Ok((total, entries))
        })
    }

    /// Hourly activity counts. Buckets are hours since the epoch — two
    /// different days never collapse into one bucket.
    pub fn audit_hourly_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditHourBucket>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT ts_ms / 3600000 AS bucket, COUNT(*), \
                            SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) \
                     FROM audit_log WHERE ts_ms >= ?1 AND ts_ms < ?2 \
                     GROUP BY bucket ORDER BY bucket",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(
                    params![from.timestamp_millis(), to.timestamp_millis()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, u64>(1)?,
                            row.get::<_, u64>(2)?,
                        ))
                    },
                )
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            Ok(rows
                .into_iter()
                .map(|(bucket, total, failures)| AuditHourBucket {
                    hour: Utc
                        .timestamp_millis_opt(bucket * 3_600_000)
                        .single()
                        .expect("bucket derived from a valid timestamp"),
                    total,
                    failures,
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn append_assigns_monotonic_seq() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let a = store
            .append_audit(&AuditEvent::new("auth_allowed", true), now)
            .unwrap();
        let b = store
            .append_audit(&AuditEvent::new("auth_denied", false), now)
            .unwrap();
        assert!(b > a);
    }

    #[test]
    fn query_filters_compose() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .append_audit(&AuditEvent::new("auth_allowed", true).user("u1", "alice"), now)
            .unwrap();
        store
            .append_audit(&AuditEvent::new("auth_denied", false).user("u2", "bob"), now)
            .unwrap();

        let (total, rows) = store
            .query_audit(&AuditQuery {
                user_id: Some("u1".into()),
                page: 1,
                page_size: 50,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].event_type, "auth_allowed");

        let (total, _) = store
            .query_audit(&AuditQuery {
                from: Some(now + Duration::hours(1)),
                page: 1,
                page_size: 50,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 0);
    }

    #[test]
    fn hourly_buckets_do_not_collapse_days() {
        let store = Store::open_in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 14, 5, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 3, 2, 14, 30, 0).unwrap();
        store
            .append_audit(&AuditEvent::new("auth_allowed", true), t0)
            .unwrap();
        store
            .append_audit(&AuditEvent::new("auth_denied", false), t1)
            .unwrap();

        let buckets = store
            .audit_hourly_stats(t0 - Duration::hours(1), t1 + Duration::hours(1))
            .unwrap();
        // Same hour-of-day on different days stays two buckets.
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].total, 1);
        assert_eq!(buckets[1].failures, 1);
    }
}
