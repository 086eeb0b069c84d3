//! Open the inventory database.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::config::DB_BUSY_TIMEOUT_MS;
use crate::utils::get_passphrase;

use super::{SCHEMA, WAL_PRAGMAS};

/// Where and how to open the database. Cloned into every thread that needs its own connection
/// (cursor readers, reindex passes); connections themselves are never shared.
#[derive(Clone, Debug)]
pub struct DbConfig {
    pub path: PathBuf,
    pub passphrase: Option<String>,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.passphrase = passphrase;
        self
    }

    /// Plain connection: key and busy timeout only. The schema is assumed to exist.
    pub fn connect(&self) -> Result<Connection> {
        connect(&self.path, self.passphrase.as_deref())
    }
}

fn connect(path: &Path, passphrase: Option<&str>) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open database {}", path.display()))?;
    if let Some(key) = passphrase {
        conn.pragma_update(None, "key", key)
            .context("set SQLCipher key")?;
    }
    conn.busy_timeout(Duration::from_millis(DB_BUSY_TIMEOUT_MS))
        .context("set busy timeout")?;
    Ok(conn)
}

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(())
}

/// Open or create the database and ensure schema + WAL.
/// If `passphrase` is Some, set SQLCipher PRAGMA key before any other operations.
pub fn open_db(path: &Path, passphrase: Option<&str>) -> Result<Connection> {
    let conn = connect(path, passphrase)?;
    apply_wal_and_schema(&conn)?;
    Ok(conn)
}

/// Open existing DB, detecting if it is encrypted: try without key first; if read fails, load
/// passphrase (env → .env in dir → prompt) and open with key. Returns (connection, passphrase_used).
pub fn open_db_or_detect_encrypted(
    path: &Path,
    dir: &Path,
) -> Result<(Connection, Option<String>)> {
    let conn = connect(path, None)?;
    if conn
        .query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))
        .is_ok()
    {
        apply_wal_and_schema(&conn)?;
        return Ok((conn, None));
    }
    drop(conn);
    let pass = get_passphrase(dir, false)?;
    let conn = open_db(path, Some(pass.as_str()))?;
    Ok((conn, Some(pass)))
}
