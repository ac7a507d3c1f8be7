//! Challenge persistence and the conditional updates that make `verify`
//! atomic per challenge. Each mutation is an `UPDATE … WHERE` carrying the
//! state the caller observed; zero affected rows means another caller won
//! the race and the orchestrator re-reads.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use mfasrv_domain::model::{Challenge, ChallengeStatus};
use mfasrv_domain::Result;

use crate::{db_err, parse_ts, parse_ts_opt, ts, Store};

const CHALLENGE_COLS: &str = "id, user_id, enrollment_id, method, status, source_ip, target, \
                              attempts, max_attempts, method_state, created, expires, responded";

struct RawChallenge {
    id: String,
    user_id: String,
    enrollment_id: String,
    method: String,
    status: String,
    source_ip: Option<String>,
    target: Option<String>,
    attempts: i64,
    max_attempts: i64,
    method_state: Option<String>,
    created: String,
    expires: String,
    responded: Option<String>,
}

fn row_to_challenge(row: &Row<'_>) -> rusqlite::Result<RawChallenge> {
    Ok(RawChallenge {
        id: row.get(0)?,
        user_id: row.get(1)?,
        enrollment_id: row.get(2)?,
        method: row.get(3)?,
        status: row.get(4)?,
        source_ip: row.get(5)?,
        target: row.get(6)?,
        attempts: row.get(7)?,
        max_attempts: row.get(8)?,
        method_state: row.get(9)?,
        created: row.get(10)?,
        expires: row.get(11)?,
        responded: row.get(12)?,
    })
}

impl RawChallenge {
    fn into_challenge(self) -> Result<Challenge> {
        Ok(Challenge {
            id: self.id,
            user_id: self.user_id,
            enrollment_id: self.enrollment_id,
            method: self.method,
            status: ChallengeStatus::parse(&self.status)?,
            source_ip: self.source_ip,
            target: self.target,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            method_state: self.method_state,
            created: parse_ts(&self.created)?,
            expires: parse_ts(&self.expires)?,
            responded: parse_ts_opt(self.responded)?,
        })
    }
}

impl Store {
    pub fn insert_challenge(&self, c: &Challenge) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO challenges (id, user_id, enrollment_id, method, status, source_ip, \
                                         target, attempts, max_attempts, method_state, created, \
                                         expires, responded)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    c.id,
                    c.user_id,
                    c.enrollment_id,
                    c.method,
                    c.status.as_str(),
                    c.source_ip,
                    c.target,
                    c.attempts,
                    c.max_attempts,
                    c.method_state,
                    ts(c.created),
                    ts(c.expires),
                    c.responded.map(ts),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn get_challenge(&self, id: &str) -> Result<Option<Challenge>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CHALLENGE_COLS} FROM challenges WHERE id = ?1"),
                [id],
                row_to_challenge,
            )
            .optional()
            .map_err(db_err)?
            .map(RawChallenge::into_challenge)
            .transpose()
        })
    }

    /// Lazy expiry: flip `issued` to `expired` once `expires ≤ now`.
    /// Returns true when this call performed the transition.
    pub fn expire_challenge_if_due(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE challenges SET status = 'expired', responded = ?2 \
                     WHERE id = ?1 AND status = 'issued' AND expires <= ?2",
                    params![id, ts(now)],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    /// Claim one verification attempt: increments `attempts` only if the row
    /// is still `issued`, unexpired, under budget, and at the attempt count
    /// the caller observed. Zero rows means the caller lost the race.
    pub fn claim_challenge_attempt(
        &self,
        id: &str,
        observed_attempts: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE challenges SET attempts = attempts + 1 \
                     WHERE id = ?1 AND status = 'issued' AND attempts = ?2 \
                       AND attempts < max_attempts AND expires > ?3",
                    params![id, observed_attempts, ts(now)],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    /// Move an `issued` challenge to a terminal state. Terminal rows are
    /// immutable — the guard makes a second transition a no-op.
    pub fn finish_challenge(
        &self,
        id: &str,
        status: ChallengeStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        debug_assert!(status.is_terminal());
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE challenges SET status = ?2, responded = ?3 \
                     WHERE id = ?1 AND status = 'issued'",
                    params![id, status.as_str(), ts(now)],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    /// Replace the method-owned opaque state blob.
    pub fn set_challenge_method_state(&self, id: &str, state: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE challenges SET method_state = ?2 WHERE id = ?1",
                params![id, state],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// Sweep: expire every overdue issued challenge in one statement.
    pub fn expire_due_challenges(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE challenges SET status = 'expired', responded = ?1 \
                 WHERE status = 'issued' AND expires <= ?1",
                params![ts(now)],
            )
            .map_err(db_err)
        })
    }

    /// Sweep: drop terminal rows older than the retention cutoff.
    pub fn purge_terminal_challenges(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM challenges WHERE status != 'issued' AND created < ?1",
                params![ts(cutoff)],
            )
            .map_err(db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn sample_challenge(id: &str, expires_in: Duration) -> Challenge {
        let now = Utc::now();
        Challenge {
            id: id.into(),
            user_id: "u1".into(),
            enrollment_id: "e1".into(),
            method: "totp".into(),
            status: ChallengeStatus::Issued,
            source_ip: Some("10.0.0.7".into()),
            target: None,
            attempts: 0,
            max_attempts: 3,
            method_state: None,
            created: now,
            expires: now + expires_in,
            responded: None,
        }
    }

    #[test]
    fn attempt_claim_is_optimistic() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_challenge(&sample_challenge("c1", Duration::minutes(5)))
            .unwrap();
        let now = Utc::now();

        assert!(store.claim_challenge_attempt("c1", 0, now).unwrap());
        // A second caller that also observed attempts=0 loses.
        assert!(!store.claim_challenge_attempt("c1", 0, now).unwrap());
        assert!(store.claim_challenge_attempt("c1", 1, now).unwrap());
        assert!(store.claim_challenge_attempt("c1", 2, now).unwrap());
        // Budget exhausted.
        assert!(!store.claim_challenge_attempt("c1", 3, now).unwrap());
        assert_eq!(store.get_challenge("c1").unwrap().unwrap().attempts, 3);
    }

    #[test]
    fn terminal_states_are_immutable() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_challenge(&sample_challenge("c1", Duration::minutes(5)))
            .unwrap();
        let now = Utc::now();

        assert!(store
            .finish_challenge("c1", ChallengeStatus::Approved, now)
            .unwrap());
        // Already terminal: both a second finish and an expiry are no-ops.
        assert!(!store
            .finish_challenge("c1", ChallengeStatus::Failed, now)
            .unwrap());
        assert!(!store.expire_challenge_if_due("c1", now + Duration::hours(1)).unwrap());
        assert_eq!(
            store.get_challenge("c1").unwrap().unwrap().status,
            ChallengeStatus::Approved
        );
    }

    #[test]
    fn lazy_expiry_applies_once_due() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_challenge(&sample_challenge("c1", Duration::minutes(5)))
            .unwrap();
        let now = Utc::now();

        assert!(!store.expire_challenge_if_due("c1", now).unwrap());
        assert!(store
            .expire_challenge_if_due("c1", now + Duration::minutes(6))
            .unwrap());
        assert_eq!(
            store.get_challenge("c1").unwrap().unwrap().status,
            ChallengeStatus::Expired
        );
    }

    #[test]
    fn sweeps_expire_and_purge() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_challenge(&sample_challenge("old", Duration::minutes(-1)))
            .unwrap();
        store
            .insert_challenge(&sample_challenge("live", Duration::minutes(5)))
            .unwrap();
        let now = Utc::now();

        assert_eq!(store.expire_due_challenges(now).unwrap(), 1);
        assert_eq!(
            store.purge_terminal_challenges(now + Duration::days(40)).unwrap(),
            1
        );
        assert!(store.get_challenge("old").unwrap().is_none());
        assert!(store.get_challenge("live").unwrap().is_some());
    }
}
