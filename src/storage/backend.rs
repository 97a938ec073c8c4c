//! Key-value backend trait and the capability-checked factory.

use std::path::Path;
use std::sync::Arc;

use crate::error::StoreError;

use super::mirror::MirrorStore;
use super::sqlite::SqliteStore;

/// Trait for durable key-value backends.
///
/// Keys are opaque strings, values opaque byte blobs; everything above this
/// trait (envelopes, checksums, the queue) is backend-agnostic. A failed `set`
/// is an `Err`, never a panic: callers treat it as a cache miss for future
/// reads.
pub trait KVStore: Send + Sync {
  fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

  fn delete(&self, key: &str) -> Result<(), StoreError>;

  fn list_keys(&self) -> Result<Vec<String>, StoreError>;

  fn clear_all(&self) -> Result<(), StoreError>;

  /// Wait for any deferred persistence to reach disk. No-op for backends that
  /// are synchronously durable.
  fn flush(&self) -> Result<(), StoreError>;
}

/// Open the preferred backend for `dir`, substituting the fallback if it is
/// unavailable.
///
/// The decision is made exactly once, here; no call site branches on which
/// backend it got.
pub fn open_store(dir: &Path) -> Result<Arc<dyn KVStore>, StoreError> {
  match MirrorStore::open(dir) {
    Ok(store) => Ok(Arc::new(store)),
    Err(err) => {
      tracing::warn!(
        "mirror store unavailable at {} ({err}), falling back to sqlite",
        dir.display()
      );
      let store = SqliteStore::open(&dir.join("offline.db"))?;
      Ok(Arc::new(store))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn opens_mirror_store_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path()).unwrap();

    store.set("k", b"v").unwrap();
    assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    // The mirror backend persists a snapshot, not a sqlite database
    store.flush().unwrap();
    assert!(dir.path().join("snapshot.json").exists());
    assert!(!dir.path().join("offline.db").exists());
  }

  #[test]
  fn falls_back_to_sqlite_when_mirror_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    // A directory squatting on the snapshot path makes the mirror unreadable
    std::fs::create_dir(dir.path().join("snapshot.json")).unwrap();

    let store = open_store(dir.path()).unwrap();
    store.set("k", b"v").unwrap();
    assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    assert!(dir.path().join("offline.db").exists());
  }

  #[test]
  fn substitution_is_transparent_to_callers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("snapshot.json")).unwrap();
    let store = open_store(dir.path()).unwrap();

    // The full contract holds regardless of which backend was picked
    store.set("a", b"1").unwrap();
    store.set("b", b"2").unwrap();
    store.delete("a").unwrap();
    assert_eq!(store.list_keys().unwrap(), vec!["b".to_string()]);
    store.clear_all().unwrap();
    assert!(store.list_keys().unwrap().is_empty());
  }
}
