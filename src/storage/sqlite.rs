//! SQLite-backed flag store

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;

use super::{FlagBatch, FlagStore, FlagWrite, REVISION_KEY, Scope, check_guard};
use crate::error::{OverlayError, Result};

pub const SCHEMA_VERSION: u32 = 1;

/// Durable flag store. Each batch is one `BEGIN IMMEDIATE` transaction.
pub struct SqliteFlagStore {
    conn: Mutex<Connection>,
    schema_version: u32,
}

impl SqliteFlagStore {
    /// Open database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::configure_pragmas(&conn)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let schema_version = run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            schema_version,
        })
    }

    /// Current schema version after migrations.
    pub const fn schema_version(&self) -> u32 {
        self.schema_version
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }
}

fn run_migrations(conn: &Connection) -> Result<u32> {
    let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if current > SCHEMA_VERSION {
        return Err(OverlayError::Config(format!(
            "database schema version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    if current < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS flags (
                 scope TEXT NOT NULL,
                 key TEXT NOT NULL,
                 value_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL,
                 PRIMARY KEY (scope, key)
             );
             PRAGMA user_version = 1;",
        )?;
    }
    Ok(SCHEMA_VERSION)
}

fn read_flag(conn: &Connection, scope: &Scope, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM flags WHERE scope = ? AND key = ?",
            params![scope.to_string(), key],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|raw| serde_json::from_str(&raw).map_err(OverlayError::from))
        .transpose()
}

impl FlagStore for SqliteFlagStore {
    fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        read_flag(&conn, scope, key)
    }

    fn list_keys(&self, scope: &Scope, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key FROM flags WHERE scope = ?1 AND substr(key, 1, length(?2)) = ?2 ORDER BY key",
        )?;
        let keys = stmt
            .query_map(params![scope.to_string(), prefix], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn commit(&self, batch: FlagBatch) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for guard in &batch.guards {
            let current = read_flag(&tx, &guard.scope, REVISION_KEY)?;
            check_guard(guard, current.as_ref())?;
        }

        let now = Utc::now().to_rfc3339();
        for write in &batch.writes {
            match write {
                FlagWrite::Set { scope, key, value } => {
                    tx.execute(
                        "INSERT INTO flags (scope, key, value_json, updated_at)
                         VALUES (?, ?, ?, ?)
                         ON CONFLICT (scope, key) DO UPDATE SET
                             value_json = excluded.value_json,
                             updated_at = excluded.updated_at",
                        params![scope.to_string(), key, serde_json::to_string(value)?, now],
                    )?;
                }
                FlagWrite::Unset { scope, key } => {
                    tx.execute(
                        "DELETE FROM flags WHERE scope = ? AND key = ?",
                        params![scope.to_string(), key],
                    )?;
                }
            }
        }

        // Dropping the transaction on any early return above rolls it back.
        tx.commit()?;
        Ok(())
    }
}
