//! Hot snapshot and restore using SQLite's online backup API, plus the
//! backup-root bookkeeping (naming, listing, retention).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::backup::Backup;
use rusqlite::Connection;
use serde::Serialize;

use mfasrv_domain::{Error, Result};

use crate::{db_err, Store};

const BACKUP_PREFIX: &str = "mfasrv_backup_";
const BACKUP_SUFFIX: &str = ".db";

/// Metadata for one snapshot file under the backup root.
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub file_name: String,
    pub size_bytes: u64,
    pub created: DateTime<Utc>,
}

/// Name a snapshot taken at `now`: `mfasrv_backup_YYYYMMDD_HHMMSS.db`.
pub fn backup_file_name(now: DateTime<Utc>) -> String {
    format!("{BACKUP_PREFIX}{}{BACKUP_SUFFIX}", now.format("%Y%m%d_%H%M%S"))
}

/// Accept only exact backup names: the fixed prefix and suffix around a
/// `YYYYMMDD_HHMMSS` core, and no path components. Anything else — traversal
/// attempts included — is rejected.
pub fn is_valid_backup_name(name: &str) -> bool {
    if Path::new(name).file_name().and_then(|f| f.to_str()) != Some(name) {
        return false;
    }
    let Some(core) = name
        .strip_prefix(BACKUP_PREFIX)
        .and_then(|rest| rest.strip_suffix(BACKUP_SUFFIX))
    else {
        return false;
    };
    let bytes = core.as_bytes();
    bytes.len() == 15
        && bytes[8] == b'_'
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[9..].iter().all(u8::is_ascii_digit)
}

impl Store {
    /// Consistent online snapshot into `root/<generated name>`. Returns the
    /// file name written.
    pub fn snapshot_to(&self, root: &Path, now: DateTime<Utc>) -> Result<String> {
        std::fs::create_dir_all(root)?;
        let file_name = backup_file_name(now);
        let dest = root.join(&file_name);
        self.with_conn(|conn| {
            let mut dst = Connection::open(&dest).map_err(db_err)?;
            let backup = Backup::new(conn, &mut dst).map_err(db_err)?;
            backup
                .run_to_completion(64, std::time::Duration::from_millis(50), None)
                .map_err(db_err)?;
            Ok(())
        })?;
        tracing::info!(file = %file_name, "state snapshot written");
        Ok(file_name)
    }

    /// Replace the live database contents from a validated snapshot file.
    pub fn restore_from(&self, root: &Path, file_name: &str) -> Result<()> {
        if !is_valid_backup_name(file_name) {
            return Err(Error::Validation(format!(
                "not a backup file name: {file_name}"
            )));
        }
        let source = root.join(file_name);
        if !source.is_file() {
            return Err(Error::NotFound(format!("backup {file_name}")));
        }
        self.with_conn_mut(|conn| {
            let src = Connection::open(&source).map_err(db_err)?;
            let backup = Backup::new(&src, conn).map_err(db_err)?;
            backup
                .run_to_completion(64, std::time::Duration::from_millis(50), None)
                .map_err(db_err)?;
            Ok(())
        })?;
        tracing::warn!(file = %file_name, "state restored from snapshot");
        Ok(())
    }
}

/// List snapshots under `root`, newest first.
pub fn list_backups(root: &Path) -> Result<Vec<BackupInfo>> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        if !is_valid_backup_name(&name) {
            continue;
        }
        let meta = entry.metadata()?;
        let created = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        out.push(BackupInfo {
            file_name: name,
            size_bytes: meta.len(),
            created,
        });
    }
    out.sort_by(|a, b| b.file_name.cmp(&a.file_name));
    Ok(out)
}

/// Delete the oldest snapshots beyond `retain`. Returns deleted names.
pub fn prune_backups(root: &Path, retain: usize) -> Result<Vec<String>> {
    let backups = list_backups(root)?;
    let mut deleted = Vec::new();
    for info in backups.into_iter().skip(retain) {
        std::fs::remove_file(root.join(&info.file_name))?;
        deleted.push(info.file_name);
    }
    Ok(deleted)
}

/// Resolve a validated backup name to its path under `root` (for download).
pub fn backup_path(root: &Path, file_name: &str) -> Result<PathBuf> {
    if !is_valid_backup_name(file_name) {
        return Err(Error::Validation(format!(
            "not a backup file name: {file_name}"
        )));
    }
    Ok(root.join(file_name))
}
