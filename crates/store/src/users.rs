//! User and group-membership queries. Users are externally mastered; the
//! only local mutations are the importer's upsert, `mfa_enabled`, and
//! `last_auth`.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use mfasrv_domain::model::{GroupMembership, User};
use mfasrv_domain::Result;

use crate::{db_err, page_bounds, parse_ts, parse_ts_opt, ts, Store};

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<(User, Option<String>, Option<String>)> {
    Ok((
        User {
            id: row.get(0)?,
            directory_object_id: row.get(1)?,
            sam: row.get(2)?,
            upn: row.get(3)?,
            display: row.get(4)?,
            email: row.get(5)?,
            phone: row.get(6)?,
            dn: row.get(7)?,
            enabled: row.get(8)?,
            mfa_enabled: row.get(9)?,
            // Filled in below once the raw strings are out of rusqlite's Result.
            last_sync: DateTime::<Utc>::MIN_UTC,
            last_auth: None,
        },
        Some(row.get::<_, String>(10)?),
        row.get(11)?,
    ))
}

fn finish_user(parts: (User, Option<String>, Option<String>)) -> Result<User> {
    let (mut user, last_sync, last_auth) = parts;
    user.last_sync = parse_ts(&last_sync.expect("last_sync is NOT NULL"))?;
    user.last_auth = parse_ts_opt(last_auth)?;
    Ok(user)
}

const USER_COLS: &str = "id, directory_object_id, sam, upn, display, email, phone, dn, \
                         enabled, mfa_enabled, last_sync, last_auth";

impl Store {
    /// Importer-style upsert keyed on id.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, directory_object_id, sam, upn, display, email, phone, dn, \
                                    enabled, mfa_enabled, last_sync, last_auth)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                     directory_object_id = excluded.directory_object_id,
                     sam = excluded.sam, upn = excluded.upn, display = excluded.display,
                     email = excluded.email, phone = excluded.phone, dn = excluded.dn,
                     enabled = excluded.enabled, last_sync = excluded.last_sync",
                params![
                    user.id,
                    user.directory_object_id,
                    user.sam,
                    user.upn,
                    user.display,
                    user.email,
                    user.phone,
                    user.dn,
                    user.enabled,
                    user.mfa_enabled,
                    ts(user.last_sync),
                    user.last_auth.map(ts),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
                [id],
                row_to_user,
            )
            .optional()
            .map_err(db_err)?
            .map(finish_user)
            .transpose()
        })
    }

    /// Resolve a logon name — matches `sam` or `upn`, case-insensitively.
    /// A `DOMAIN\name` prefix is stripped before matching.
    pub fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let bare = name.rsplit('\\').next().unwrap_or(name);
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {USER_COLS} FROM users \
                     WHERE sam = ?1 COLLATE NOCASE OR upn = ?1 COLLATE NOCASE \
                     LIMIT 1"
                ),
                [bare],
                row_to_user,
            )
            .optional()
            .map_err(db_err)?
            .map(finish_user)
            .transpose()
        })
    }

    pub fn list_users(&self, page: u64, page_size: u64) -> Result<(u64, Vec<User>)> {
        let (limit, offset) = page_bounds(page, page_size);
        self.with_conn(|conn| {
            let total: u64 = conn
                .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
                .map_err(db_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {USER_COLS} FROM users ORDER BY sam LIMIT ?1 OFFSET ?2"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![limit, offset], row_to_user)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            let users = rows.into_iter().map(finish_user).collect::<Result<_>>()?;
            Ok((total, users))
        })
    }

    /// Mirror of active-enrollment presence; never touches the directory.
    pub fn set_mfa_enabled(&self, user_id: &str, enabled: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET mfa_enabled = ?2 WHERE id = ?1",
                params![user_id, enabled],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn touch_last_auth(&self, user_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_auth = ?2 WHERE id = ?1",
                params![user_id, ts(now)],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn group_memberships(&self, user_id: &str) -> Result<Vec<GroupMembership>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT user_id, group_sid, group_name, group_dn, synced_at \
                     FROM group_memberships WHERE user_id = ?1",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows.into_iter()
                .map(|(user_id, group_sid, group_name, group_dn, synced_at)| {
                    Ok(GroupMembership {
                        user_id,
                        group_sid,
                        group_name,
                        group_dn,
                        synced_at: parse_ts(&synced_at)?,
                    })
                })
                .collect()
        })
    }

    /// Importer-style replacement of a user's membership snapshot.
    pub fn replace_group_memberships(
        &self,
        user_id: &str,
        memberships: &[GroupMembership],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute("DELETE FROM group_memberships WHERE user_id = ?1", [user_id])
                .map_err(db_err)?;
            for m in memberships {
                tx.execute(
                    "INSERT INTO group_memberships (user_id, group_sid, group_name, group_dn, synced_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![user_id, m.group_sid, m.group_name, m.group_dn, ts(m.synced_at)],
                )
                .map_err(db_err)?;
            }
            tx.commit().map_err(db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_user(id: &str, sam: &str) -> User {
        User {
            id: id.into(),
            directory_object_id: format!("obj-{id}"),
            sam: sam.into(),
            upn: format!("{sam}@corp.example"),
            display: sam.to_uppercase(),
            email: Some(format!("{sam}@corp.example")),
            phone: None,
            dn: format!("CN={sam},OU=Users,DC=corp,DC=example"),
            enabled: true,
            mfa_enabled: false,
            last_sync: Utc::now(),
            last_auth: None,
        }
    }

    #[test]
    fn upsert_and_find_case_insensitive() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_user(&sample_user("u1", "alice")).unwrap();

        let found = store.find_user_by_name("ALICE").unwrap().unwrap();
        assert_eq!(found.id, "u1");
        let by_upn = store.find_user_by_name("Alice@CORP.example").unwrap().unwrap();
        assert_eq!(by_upn.id, "u1");
        let with_domain = store.find_user_by_name("CORP\\alice").unwrap().unwrap();
        assert_eq!(with_domain.id, "u1");
        assert!(store.find_user_by_name("mallory").unwrap().is_none());
    }

    #[test]
    fn memberships_replace_snapshot() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_user(&sample_user("u1", "alice")).unwrap();
        let now = Utc::now();
        let m = |sid: &str| GroupMembership {
            user_id: "u1".into(),
            group_sid: sid.into(),
            group_name: "Domain Admins".into(),
            group_dn: "CN=Domain Admins".into(),
            synced_at: now,
        };
        store
            .replace_group_memberships("u1", &[m("S-1-5-21-1-2-3-512")])
            .unwrap();
        store
            .replace_group_memberships("u1", &[m("S-1-5-21-1-2-3-513")])
            .unwrap();
        let got = store.group_memberships("u1").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].group_sid, "S-1-5-21-1-2-3-513");
    }

    #[test]
    fn list_users_paginates() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .upsert_user(&sample_user(&format!("u{i}"), &format!("user{i}")))
                .unwrap();
        }
        let (total, page) = store.list_users(2, 2).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].sam, "user2");
    }
}
