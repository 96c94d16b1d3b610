//! Single-writer key→record store guaranteeing at-most-once effect per
//! event. Keys are the event identity digests; values are canonical
//! record blobs. First writer wins; later puts for the same key are
//! no-ops. The schema version rides in `PRAGMA user_version` and any
//! unknown value is a hard failure — never migrated.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::canonical;
use crate::{Error, Result};

const SCHEMA_VERSION: i64 = 1;

/// Default store path, overridable through the environment.
pub fn default_idempotency_db_path() -> PathBuf {
    match std::env::var("BUFF_IDEMPOTENCY_DB_PATH") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => Path::new("workspaces").join("idempotency.sqlite"),
    }
}

#[derive(Debug)]
pub struct IdempotencyStore {
    conn: Connection,
}

impl IdempotencyStore {
    pub fn open(path: &Path) -> Result<IdempotencyStore> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::ensure_schema(&conn)?;
        Ok(IdempotencyStore { conn })
    }

    pub fn open_default() -> Result<IdempotencyStore> {
        Self::open(&default_idempotency_db_path())
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<IdempotencyStore> {
        let conn = Connection::open_in_memory()?;
        Self::ensure_schema(&conn)?;
        Ok(IdempotencyStore { conn })
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS idempotency_records (
                key TEXT PRIMARY KEY,
                record_json TEXT NOT NULL
            )",
            [],
        )?;
        let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current == 0 {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        } else if current != SCHEMA_VERSION {
            return Err(Error::SchemaMismatch {
                found: current.to_string(),
                expected: SCHEMA_VERSION.to_string(),
            });
        }
        Ok(())
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM idempotency_records WHERE key = ?1 LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM idempotency_records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Insert-if-absent. Returns whether this call was the first writer.
    pub fn put(&self, key: &str, record: &Value) -> Result<bool> {
        let payload = canonical::canonical_json(record)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO idempotency_records (key, record_json) VALUES (?1, ?2)",
            params![key, payload],
        )?;
        Ok(inserted > 0)
    }
}
