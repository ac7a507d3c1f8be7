//! Enrollment persistence. The partial unique index keeps the "one active
//! enrollment per (user, method)" invariant inside the store itself.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use mfasrv_domain::model::{Enrollment, EnrollmentStatus};
use mfasrv_domain::{Error, Result};

use crate::{db_err, page_bounds, parse_ts, parse_ts_opt, ts, Store};

const ENROLLMENT_COLS: &str = "id, user_id, method, status, encrypted_secret, secret_nonce, \
                               device_identifier, friendly_name, created, activated, last_used";

struct RawEnrollment {
    id: String,
    user_id: String,
    method: String,
    status: String,
    encrypted_secret: Vec<u8>,
    secret_nonce: Vec<u8>,
    device_identifier: Option<String>,
    friendly_name: Option<String>,
    created: String,
    activated: Option<String>,
    last_used: Option<String>,
}

fn row_to_enrollment(row: &Row<'_>) -> rusqlite::Result<RawEnrollment> {
    Ok(RawEnrollment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        method: row.get(2)?,
        status: row.get(3)?,
        encrypted_secret: row.get(4)?,
        secret_nonce: row.get(5)?,
        device_identifier: row.get(6)?,
        friendly_name: row.get(7)?,
        created: row.get(8)?,
        activated: row.get(9)?,
        last_used: row.get(10)?,
    })
}

impl RawEnrollment {
    fn into_enrollment(self) -> Result<Enrollment> {
        Ok(Enrollment {
            id: self.id,
            user_id: self.user_id,
            method: self.method,
            status: EnrollmentStatus::parse(&self.status)?,
            encrypted_secret: self.encrypted_secret,
            secret_nonce: self.secret_nonce,
            device_identifier: self.device_identifier,
            friendly_name: self.friendly_name,
            created: parse_ts(&self.created)?,
            activated: parse_ts_opt(self.activated)?,
            last_used: parse_ts_opt(self.last_used)?,
        })
    }
}

impl Store {
    pub fn insert_enrollment(&self, e: &Enrollment) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO enrollments (id, user_id, method, status, encrypted_secret, \
                                          secret_nonce, device_identifier, friendly_name, \
                                          created, activated, last_used)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    e.id,
                    e.user_id,
                    e.method,
                    e.status.as_str(),
                    e.encrypted_secret,
                    e.secret_nonce,
                    e.device_identifier,
                    e.friendly_name,
                    ts(e.created),
                    e.activated.map(ts),
                    e.last_used.map(ts),
                ],
            )
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::Validation(format!(
                        "user {} already has an active {} enrollment",
                        e.user_id, e.method
                    ))
                }
                other => db_err(other),
            })?;
            Ok(())
        })
    }

    pub fn get_enrollment(&self, id: &str) -> Result<Option<Enrollment>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {ENROLLMENT_COLS} FROM enrollments WHERE id = ?1"),
                [id],
                row_to_enrollment,
            )
            .optional()
            .map_err(db_err)?
            .map(RawEnrollment::into_enrollment)
            .transpose()
        })
    }

    /// The single active enrollment for `(user, method)`, if any.
    pub fn active_enrollment(&self, user_id: &str, method: &str) -> Result<Option<Enrollment>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {ENROLLMENT_COLS} FROM enrollments \
                     WHERE user_id = ?1 AND method = ?2 AND status = 'active'"
                ),
                params![user_id, method],
                row_to_enrollment,
            )
            .optional()
            .map_err(db_err)?
            .map(RawEnrollment::into_enrollment)
            .transpose()
        })
    }

    pub fn enrollments_for_user(&self, user_id: &str) -> Result<Vec<Enrollment>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {ENROLLMENT_COLS} FROM enrollments WHERE user_id = ?1 ORDER BY created"
                ))
                .map_err(db_err)?;
            let raws = stmt
                .query_map([user_id], row_to_enrollment)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            raws.into_iter().map(RawEnrollment::into_enrollment).collect()
        })
    }

    pub fn list_enrollments(&self, page: u64, page_size: u64) -> Result<(u64, Vec<Enrollment>)> {
        let (limit, offset) = page_bounds(page, page_size);
        self.with_conn(|conn| {
            let total: u64 = conn
                .query_row("SELECT COUNT(*) FROM enrollments", [], |r| r.get(0))
                .map_err(db_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {ENROLLMENT_COLS} FROM enrollments ORDER BY created DESC \
                     LIMIT ?1 OFFSET ?2"
                ))
                .map_err(db_err)?;
            let raws = stmt
                .query_map(params![limit, offset], row_to_enrollment)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            let list = raws
                .into_iter()
                .map(RawEnrollment::into_enrollment)
                .collect::<Result<_>>()?;
            Ok((total, list))
        })
    }

    /// Transition an enrollment's status. Activation sets `activated`; the
    /// partial unique index rejects a second concurrent activation.
    pub fn set_enrollment_status(
        &self,
        id: &str,
        status: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let changed = if status == EnrollmentStatus::Active {
                conn.execute(
                    "UPDATE enrollments SET status = 'active', activated = ?2 WHERE id = ?1",
                    params![id, ts(now)],
                )
            } else {
                conn.execute(
                    "UPDATE enrollments SET status = ?2 WHERE id = ?1",
                    params![id, status.as_str()],
                )
            }
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::Validation("another active enrollment exists for this method".into())
                }
                other => db_err(other),
            })?;
            if changed == 0 {
                return Err(Error::NotFound(format!("enrollment {id}")));
            }
            Ok(())
        })
    }

    pub fn touch_enrollment_used(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE enrollments SET last_used = ?2 WHERE id = ?1",
                params![id, ts(now)],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn delete_enrollment(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM enrollments WHERE id = ?1", [id])
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    pub fn has_active_enrollments(&self, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM enrollments WHERE user_id = ?1 AND status = 'active'",
                    [user_id],
                    |r| r.get(0),
                )
                .map_err(db_err)?;
            Ok(count > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_enrollment(id: &str, user_id: &str, method: &str) -> Enrollment {
        Enrollment {
            id: id.into(),
            user_id: user_id.into(),
            method: method.into(),
            status: EnrollmentStatus::Pending,
            encrypted_secret: vec![1, 2, 3],
            secret_nonce: vec![0; 12],
            device_identifier: None,
            friendly_name: None,
            created: Utc::now(),
            activated: None,
            last_used: None,
        }
    }

    #[test]
    fn one_active_enrollment_per_user_method() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_enrollment(&sample_enrollment("e1", "u1", "totp"))
            .unwrap();
        store
            .insert_enrollment(&sample_enrollment("e2", "u1", "totp"))
            .unwrap();

        let now = Utc::now();
        store
            .set_enrollment_status("e1", EnrollmentStatus::Active, now)
            .unwrap();
        let err = store
            .set_enrollment_status("e2", EnrollmentStatus::Active, now)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // A different method is fine.
        store
            .insert_enrollment(&sample_enrollment("e3", "u1", "email_otp"))
            .unwrap();
        store
            .set_enrollment_status("e3", EnrollmentStatus::Active, now)
            .unwrap();
        assert!(store.has_active_enrollments("u1").unwrap());
    }

    #[test]
    fn active_lookup_finds_only_active() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_enrollment(&sample_enrollment("e1", "u1", "totp"))
            .unwrap();
        assert!(store.active_enrollment("u1", "totp").unwrap().is_none());

        store
            .set_enrollment_status("e1", EnrollmentStatus::Active, Utc::now())
            .unwrap();
        let found = store.active_enrollment("u1", "totp").unwrap().unwrap();
        assert_eq!(found.id, "e1");
        assert!(found.activated.is_some());
    }
}
