//! SQLite key-value backend, the fallback when the mirror store is
//! unavailable. Synchronously durable; every statement commits on its own.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;

use super::backend::KVStore;

/// Schema for the key-value table.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

impl KVStore for SqliteStore {
  fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO kv_store (key, value, written_at)
       VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE key = ?")?;

    match stmt.query_row(params![key], |row| row.get::<_, Vec<u8>>(0)) {
      Ok(value) => Ok(Some(value)),
      Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
      Err(err) => Err(err.into()),
    }
  }

  fn delete(&self, key: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
    Ok(())
  }

  fn list_keys(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT key FROM kv_store ORDER BY key")?;
    let keys = stmt
      .query_map([], |row| row.get::<_, String>(0))?
      .collect::<Result<Vec<String>, rusqlite::Error>>()?;
    Ok(keys)
  }

  fn clear_all(&self) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM kv_store", [])?;
    Ok(())
  }

  fn flush(&self) -> Result<(), StoreError> {
    Ok(())
  }
}
