//! Fast key-value backend: an in-memory mirror with deferred snapshot
//! persistence.
//!
//! Reads and writes hit a `HashMap` and return immediately; durability comes
//! from a whole-map snapshot written in the background. The snapshot is
//! replaced atomically (unique temp file + rename), so a crash between the
//! in-memory update and the disk write leaves the previous snapshot intact.
//! At worst the latest writes are lost, which reads as a cache miss.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::StoreError;

use super::backend::KVStore;

const SNAPSHOT_FILE: &str = "snapshot.json";

struct Inner {
  dir: PathBuf,
  map: Mutex<HashMap<String, Vec<u8>>>,
  /// Generation of the latest in-memory mutation.
  generation: AtomicU64,
  /// Generation last written to disk. Guards the write+rename section and
  /// lets a task that lost the race skip its write.
  persisted: Mutex<u64>,
}

pub struct MirrorStore {
  inner: Arc<Inner>,
  handle: Option<tokio::runtime::Handle>,
}

impl MirrorStore {
  /// Open the store at `dir`, loading the previous snapshot if one exists.
  ///
  /// Fails when the directory cannot be created or written; the factory uses
  /// that to substitute the sqlite backend. An unparseable snapshot is set
  /// aside as `snapshot.json.bak` and the store starts empty.
  pub fn open(dir: &Path) -> Result<Self, StoreError> {
    fs::create_dir_all(dir)?;
    let snapshot_path = dir.join(SNAPSHOT_FILE);

    let map = match fs::read(&snapshot_path) {
      Ok(bytes) => match decode_snapshot(&bytes) {
        Ok(map) => map,
        Err(err) => {
          tracing::warn!(
            "unparseable snapshot at {}: {err}; starting empty",
            snapshot_path.display()
          );
          let _ = fs::rename(&snapshot_path, dir.join("snapshot.json.bak"));
          HashMap::new()
        }
      },
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
      Err(err) => {
        return Err(StoreError::Unavailable(format!(
          "cannot read snapshot at {}: {err}",
          snapshot_path.display()
        )))
      }
    };

    // Probe writability up front so the factory can fall back early instead
    // of discovering the problem on the first deferred persist.
    let probe = dir.join(".probe");
    fs::write(&probe, b"ok").map_err(|err| {
      StoreError::Unavailable(format!("data dir {} is not writable: {err}", dir.display()))
    })?;
    let _ = fs::remove_file(&probe);

    Ok(Self {
      inner: Arc::new(Inner {
        dir: dir.to_path_buf(),
        map: Mutex::new(map),
        generation: AtomicU64::new(0),
        persisted: Mutex::new(0),
      }),
      handle: tokio::runtime::Handle::try_current().ok(),
    })
  }

  fn schedule_persist(&self, generation: u64) {
    match &self.handle {
      Some(handle) => {
        let inner = Arc::clone(&self.inner);
        handle.spawn_blocking(move || {
          if let Err(err) = persist(&inner, generation) {
            tracing::warn!("deferred snapshot persist failed: {err}");
          }
        });
      }
      // No runtime to defer onto; persist inline.
      None => {
        if let Err(err) = persist(&self.inner, generation) {
          tracing::warn!("snapshot persist failed: {err}");
        }
      }
    }
  }
}

impl KVStore for MirrorStore {
  fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
    let generation = {
      let mut map = self.inner.map.lock().map_err(|_| StoreError::LockPoisoned)?;
      map.insert(key.to_string(), value.to_vec());
      self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    };
    self.schedule_persist(generation);
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let map = self.inner.map.lock().map_err(|_| StoreError::LockPoisoned)?;
    Ok(map.get(key).cloned())
  }

  fn delete(&self, key: &str) -> Result<(), StoreError> {
    let generation = {
      let mut map = self.inner.map.lock().map_err(|_| StoreError::LockPoisoned)?;
      if map.remove(key).is_none() {
        return Ok(());
      }
      self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    };
    self.schedule_persist(generation);
    Ok(())
  }

  fn list_keys(&self) -> Result<Vec<String>, StoreError> {
    let map = self.inner.map.lock().map_err(|_| StoreError::LockPoisoned)?;
    Ok(map.keys().cloned().collect())
  }

  fn clear_all(&self) -> Result<(), StoreError> {
    let generation = {
      let mut map = self.inner.map.lock().map_err(|_| StoreError::LockPoisoned)?;
      map.clear();
      self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    };
    self.schedule_persist(generation);
    Ok(())
  }

  fn flush(&self) -> Result<(), StoreError> {
    let generation = self.inner.generation.load(Ordering::SeqCst);
    persist(&self.inner, generation)
  }
}

impl Drop for MirrorStore {
  fn drop(&mut self) {
    if let Err(err) = self.flush() {
      tracing::debug!("final snapshot flush failed: {err}");
    }
  }
}

/// Write the current map as a snapshot, if `generation` is newer than what is
/// already on disk.
///
/// Lock order is persisted -> map; nothing takes them in the other order.
fn persist(inner: &Inner, generation: u64) -> Result<(), StoreError> {
  let mut persisted = inner.persisted.lock().map_err(|_| StoreError::LockPoisoned)?;
  if *persisted >= generation {
    return Ok(());
  }

  let (encoded, snapshot_generation) = {
    let map = inner.map.lock().map_err(|_| StoreError::LockPoisoned)?;
    let encoded: BTreeMap<String, String> =
      map.iter().map(|(k, v)| (k.clone(), hex::encode(v))).collect();
    (encoded, inner.generation.load(Ordering::SeqCst))
  };

  let bytes = serde_json::to_vec(&encoded)?;
  let tmp = inner.dir.join(format!("{SNAPSHOT_FILE}.{generation}.tmp"));
  fs::write(&tmp, &bytes)?;
  fs::rename(&tmp, inner.dir.join(SNAPSHOT_FILE))?;

  *persisted = snapshot_generation;
  Ok(())
}

fn decode_snapshot(bytes: &[u8]) -> Result<HashMap<String, Vec<u8>>, StoreError> {
  let encoded: BTreeMap<String, String> = serde_json::from_slice(bytes)?;
  let mut map = HashMap::with_capacity(encoded.len());
  for (key, value) in encoded {
    let value = hex::decode(&value)
      .map_err(|err| StoreError::Unavailable(format!("bad snapshot entry {key}: {err}")))?;
    map.insert(key, value);
  }
  Ok(map)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_get_delete_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = MirrorStore::open(dir.path()).unwrap();

    store.set("a", b"one").unwrap();
    store.set("b", b"two").unwrap();
    assert_eq!(store.get("a").unwrap(), Some(b"one".to_vec()));

    store.delete("a").unwrap();
    assert_eq!(store.get("a").unwrap(), None);

    let mut keys = store.list_keys().unwrap();
    keys.sort();
    assert_eq!(keys, vec!["b".to_string()]);
  }

  #[test]
  fn overwrite_replaces_value() {
    let dir = tempfile::tempdir().unwrap();
    let store = MirrorStore::open(dir.path()).unwrap();

    store.set("k", b"old").unwrap();
    store.set("k", b"new").unwrap();
    assert_eq!(store.get("k").unwrap(), Some(b"new".to_vec()));
  }

  #[test]
  fn flush_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
      let store = MirrorStore::open(dir.path()).unwrap();
      store.set("k", b"v").unwrap();
      store.flush().unwrap();
    }

    let store = MirrorStore::open(dir.path()).unwrap();
    assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
  }

  #[test]
  fn delete_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
      let store = MirrorStore::open(dir.path()).unwrap();
      store.set("keep", b"1").unwrap();
      store.set("drop", b"2").unwrap();
      store.delete("drop").unwrap();
      store.flush().unwrap();
    }

    let store = MirrorStore::open(dir.path()).unwrap();
    assert_eq!(store.get("keep").unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.get("drop").unwrap(), None);
  }

  #[test]
  fn corrupt_snapshot_opens_empty_and_is_preserved() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(SNAPSHOT_FILE), b"not json at all").unwrap();

    let store = MirrorStore::open(dir.path()).unwrap();
    assert!(store.list_keys().unwrap().is_empty());
    assert!(dir.path().join("snapshot.json.bak").exists());

    // The store is fully usable afterwards
    store.set("k", b"v").unwrap();
    store.flush().unwrap();
    drop(store);
    let reopened = MirrorStore::open(dir.path()).unwrap();
    assert_eq!(reopened.get("k").unwrap(), Some(b"v".to_vec()));
  }

  #[test]
  fn clear_all_empties_store_and_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    {
      let store = MirrorStore::open(dir.path()).unwrap();
      store.set("a", b"1").unwrap();
      store.clear_all().unwrap();
      store.flush().unwrap();
    }

    let store = MirrorStore::open(dir.path()).unwrap();
    assert!(store.list_keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn deferred_persist_lands_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let store = MirrorStore::open(dir.path()).unwrap();

    // Inside a runtime the persist is scheduled off the caller's thread; the
    // set still returns immediately with the mirror updated.
    store.set("k", b"v").unwrap();
    assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));

    store.flush().unwrap();
    let on_disk = fs::read(dir.path().join(SNAPSHOT_FILE)).unwrap();
    let decoded = decode_snapshot(&on_disk).unwrap();
    assert_eq!(decoded.get("k"), Some(&b"v".to_vec()));
  }
}
