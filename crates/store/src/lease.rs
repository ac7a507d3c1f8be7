//! Database-backed singleton election. One row keyed `"primary"`; takeover
//! of an expired lease is optimistic — the update carries the holder and
//! expiry the challenger observed, and zero affected rows demotes it to
//! standby for the round.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use mfasrv_domain::model::LeaderLease;
use mfasrv_domain::Result;

use crate::{db_err, parse_ts, ts, Store};

const LEASE_KEY: &str = "primary";

/// Outcome of one election round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Leader,
    Standby,
}

impl Store {
    /// Run one election round for `holder_id`. Acquires a free or expired
    /// lease, extends a lease already held, and otherwise stands by.
    pub fn tick_leader_lease(
        &self,
        holder_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<LeaseState> {
        let expires = ts(now + lease);
        self.with_conn(|conn| {
            let current = conn
                .query_row(
                    "SELECT holder_id, expires FROM leader_lease WHERE key = ?1",
                    [LEASE_KEY],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(db_err)?;

            match current {
                None => {
                    // Try-insert; a concurrent insert wins the PK race.
                    let inserted = conn
                        .execute(
                            "INSERT OR IGNORE INTO leader_lease \
                             (key, holder_id, acquired, expires, renewed) \
                             VALUES (?1, ?2, ?3, ?4, ?3)",
                            params![LEASE_KEY, holder_id, ts(now), expires],
                        )
                        .map_err(db_err)?;
                    Ok(if inserted > 0 {
                        LeaseState::Leader
                    } else {
                        LeaseState::Standby
                    })
                }
                Some((holder, _)) if holder == holder_id => {
                    conn.execute(
                        "UPDATE leader_lease SET expires = ?2, renewed = ?3 \
                         WHERE key = ?1 AND holder_id = ?4",
                        params![LEASE_KEY, expires, ts(now), holder_id],
                    )
                    .map_err(db_err)?;
                    Ok(LeaseState::Leader)
                }
                Some((holder, lease_expires)) => {
                    if parse_ts(&lease_expires)? > now {
                        return Ok(LeaseState::Standby);
                    }
                    // Expired lease held by someone else: optimistic takeover
                    // conditioned on the observed holder and expiry.
                    let taken = conn
                        .execute(
                            "UPDATE leader_lease SET holder_id = ?2, acquired = ?3, \
                             expires = ?4, renewed = ?3 \
                             WHERE key = ?1 AND holder_id = ?5 AND expires = ?6",
                            params![LEASE_KEY, holder_id, ts(now), expires, holder, lease_expires],
                        )
                        .map_err(db_err)?;
                    Ok(if taken > 0 {
                        LeaseState::Leader
                    } else {
                        LeaseState::Standby
                    })
                }
            }
        })
    }

    /// Best-effort release on shutdown: expire the lease immediately so a
    /// standby can take over without waiting out the duration.
    pub fn release_leader_lease(&self, holder_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE leader_lease SET expires = ?2 WHERE key = ?1 AND holder_id = ?3",
                params![LEASE_KEY, ts(now), holder_id],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn current_leader(&self) -> Result<Option<LeaderLease>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT key, holder_id, acquired, expires, renewed \
                 FROM leader_lease WHERE key = ?1",
                [LEASE_KEY],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?
            .map(|(key, holder_id, acquired, expires, renewed)| {
                Ok(LeaderLease {
                    key,
                    holder_id,
                    acquired: parse_ts(&acquired)?,
                    expires: parse_ts(&expires)?,
                    renewed: parse_ts(&renewed)?,
                })
            })
            .transpose()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_leader_within_lease() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let lease = Duration::seconds(30);

        assert_eq!(
            store.tick_leader_lease("i1", now, lease).unwrap(),
            LeaseState::Leader
        );
        assert_eq!(
            store.tick_leader_lease("i2", now, lease).unwrap(),
            LeaseState::Standby
        );
        // Held leases renew.
        assert_eq!(
            store
                .tick_leader_lease("i1", now + Duration::seconds(10), lease)
                .unwrap(),
            LeaseState::Leader
        );
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let lease = Duration::seconds(30);

        store.tick_leader_lease("i1", now, lease).unwrap();
        let later = now + Duration::seconds(60);
        assert_eq!(
            store.tick_leader_lease("i2", later, lease).unwrap(),
            LeaseState::Leader
        );
        assert_eq!(
            store.current_leader().unwrap().unwrap().holder_id,
            "i2"
        );
        // The old leader now stands by.
        assert_eq!(
            store.tick_leader_lease("i1", later, lease).unwrap(),
            LeaseState::Standby
        );
    }

    #[test]
    fn release_lets_standby_take_over_immediately() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let lease = Duration::seconds(30);

        store.tick_leader_lease("i1", now, lease).unwrap();
        store.release_leader_lease("i1", now).unwrap();
        assert_eq!(
            store
                .tick_leader_lease("i2", now + Duration::milliseconds(1), lease)
                .unwrap(),
            LeaseState::Leader
        );
    }
}
