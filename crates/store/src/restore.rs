//! Single-use restore confirmation tokens, persisted so any instance can
//! confirm a restore requested through another one.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};

use mfasrv_domain::Result;

use crate::{db_err, parse_ts, ts, Store};

/// Minutes a restore request stays confirmable.
pub const RESTORE_TOKEN_VALIDITY_MIN: i64 = 5;

impl Store {
    /// Record a restore request for `file_name` and hand back the
    /// confirmation token.
    pub fn create_restore_token(&self, file_name: &str, now: DateTime<Utc>) -> Result<String> {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);
        let expires = now + Duration::minutes(RESTORE_TOKEN_VALIDITY_MIN);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO restore_tokens (token, file_name, expires) VALUES (?1, ?2, ?3)",
                params![token, file_name, ts(expires)],
            )
            .map_err(db_err)?;
            Ok(())
        })?;
        Ok(token)
    }

    /// Redeem a token. Single use: the row is deleted inside the same
    /// transaction that reads it. Returns the filename it was tied to, or
    /// `None` for unknown, reused, or expired tokens.
    pub fn consume_restore_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let row = tx
                .query_row(
                    "SELECT file_name, expires FROM restore_tokens WHERE token = ?1",
                    [token],
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(db_err)?;
            let result = match row {
                None => None,
                Some((file_name, expires)) => {
                    tx.execute("DELETE FROM restore_tokens WHERE token = ?1", [token])
                        .map_err(db_err)?;
                    if parse_ts(&expires)? > now {
                        Some(file_name)
                    } else {
                        None
                    }
                }
            };
            tx.commit().map_err(db_err)?;
            Ok(result)
        })
    }

    /// Sweep: drop expired tokens.
    pub fn purge_restore_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM restore_tokens WHERE expires <= ?1",
                params![ts(now)],
            )
            .map_err(db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_single_use() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let token = store
            .create_restore_token("mfasrv_backup_20250301_120000.db", now)
            .unwrap();

        assert_eq!(
            store.consume_restore_token(&token, now).unwrap().as_deref(),
            Some("mfasrv_backup_20250301_120000.db")
        );
        assert!(store.consume_restore_token(&token, now).unwrap().is_none());
    }

    #[test]
    fn expired_token_is_rejected_and_burned() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let token = store
            .create_restore_token("mfasrv_backup_20250301_120000.db", now)
            .unwrap();
        let late = now + Duration::minutes(RESTORE_TOKEN_VALIDITY_MIN + 1);
        assert!(store.consume_restore_token(&token, late).unwrap().is_none());
    }

    #[test]
    fn unknown_token_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .consume_restore_token("deadbeef", Utc::now())
            .unwrap()
            .is_none());
    }
}
