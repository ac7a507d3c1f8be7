//! Central relational state store.
//!
//! One SQLite file, WAL journaling, normal-synchronous fsync. The store
//! exclusively owns every §3 entity; agents keep only derived caches. The
//! connection is guarded by a `parking_lot::Mutex` — statements are short
//! and row-oriented, and per-key serialization for hot rows (challenges,
//! sessions, the leader lease) is done with conditional updates checked for
//! affected-row counts.

mod agents;
mod audit;
mod backup;
mod challenges;
mod enrollments;
mod lease;
mod policies;
mod restore;
mod schema;
mod sessions;
mod users;

pub use agents::*;
pub use audit::*;
pub use backup::*;
pub use lease::LeaseState;
pub use restore::*;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

use mfasrv_domain::{Error, Result};

/// Handle to the central state file.
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    /// Open (creating if necessary) the state file and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        configure(&conn)?;
        schema::migrate(&conn)?;
        tracing::info!(path = %path.display(), "state store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_owned(),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Path of the backing file (`:memory:` for test stores).
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub(crate) fn with_conn_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "NORMAL").map_err(db_err)?;
    conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;
    conn.busy_timeout(std::time::Duration::from_secs(5)).map_err(db_err)?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Column helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

/// Timestamps are stored as RFC 3339 UTC text with millisecond resolution.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("bad timestamp {raw:?}: {e}")))
}

pub(crate) fn parse_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(&s)).transpose()
}

/// Pagination arithmetic shared by the list queries. Pages are 1-based.
pub(crate) fn page_bounds(page: u64, page_size: u64) -> (i64, i64) {
    let size = page_size.clamp(1, 500) as i64;
    let offset = (page.max(1) - 1) as i64 * size;
    (size, offset)
}
