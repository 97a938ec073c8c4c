//! Checksum layer over a key-value backend.
//!
//! Every entry gets a sibling `<key>_checksum` value holding a digest of the
//! exact serialized envelope bytes. A mismatch at read time does not withhold
//! the data (for a read-mostly UI, degraded trust beats no data), but the
//! result is flagged so the caller can decide what to trust it for. Checksums
//! are produced and verified only here; no other component constructs one.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::error::StoreError;

use super::backend::KVStore;
use super::record::CacheRecord;

/// Derived key for the checksum sibling of `key`. The two form an inseparable
/// pair in durable storage.
pub fn checksum_key(key: &str) -> String {
  format!("{key}_checksum")
}

pub(crate) fn digest(bytes: &[u8]) -> String {
  hex::encode(crc32fast::hash(bytes).to_be_bytes())
}

/// A value read back through the integrity layer.
#[derive(Debug, Clone)]
pub struct Verified<T> {
  pub data: T,
  /// When the envelope was written, from its embedded timestamp.
  pub stored_at: DateTime<Utc>,
  /// True when the stored bytes no longer match their checksum.
  pub corrupted: bool,
}

#[derive(Clone)]
pub struct IntegrityStore {
  store: Arc<dyn KVStore>,
}

impl IntegrityStore {
  pub fn new(store: Arc<dyn KVStore>) -> Self {
    Self { store }
  }

  /// The underlying backend, for key listing and flushing.
  pub fn store(&self) -> &Arc<dyn KVStore> {
    &self.store
  }

  /// Serialize `data` into a fresh envelope, write it, then write its digest.
  pub fn save<T: Serialize>(&self, key: &str, data: &T) -> Result<(), StoreError> {
    let record = CacheRecord::new(serde_json::to_value(data)?);
    let bytes = serde_json::to_vec(&record)?;
    self.store.set(key, &bytes)?;
    self.store.set(&checksum_key(key), digest(&bytes).as_bytes())?;
    Ok(())
  }

  /// Read `key` back, verifying its checksum.
  ///
  /// Returns `None` for an absent or undecodable entry. Store errors on the
  /// read path are logged and read as a miss; the remote is re-fetchable.
  pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<Verified<T>> {
    let bytes = match self.store.get(key) {
      Ok(Some(bytes)) => bytes,
      Ok(None) => return None,
      Err(err) => {
        tracing::warn!("read failed for {key}: {err}");
        return None;
      }
    };

    let corrupted = match self.store.get(&checksum_key(key)) {
      Ok(Some(saved)) => {
        let expected = digest(&bytes);
        saved != expected.as_bytes()
      }
      // No checksum on file: trust the entry as-is.
      Ok(None) => false,
      Err(err) => {
        tracing::warn!("checksum read failed for {key}: {err}");
        false
      }
    };
    if corrupted {
      tracing::warn!("checksum mismatch for {key}, data may be corrupted");
    }

    let record: CacheRecord = match serde_json::from_slice(&bytes) {
      Ok(record) => record,
      Err(err) => {
        tracing::warn!("undecodable cache entry at {key}: {err}");
        return None;
      }
    };
    let data = match serde_json::from_value(record.data) {
      Ok(data) => data,
      Err(err) => {
        tracing::warn!("cache entry at {key} has an unexpected shape: {err}");
        return None;
      }
    };

    Some(Verified {
      data,
      stored_at: record.timestamp,
      corrupted,
    })
  }

  /// Age of the entry at `key`, from the embedded envelope timestamp.
  pub fn data_age(&self, key: &str) -> Option<chrono::Duration> {
    let bytes = self.store.get(key).ok().flatten()?;
    let record: CacheRecord = serde_json::from_slice(&bytes).ok()?;
    Some(record.age())
  }

  /// Delete the entry and its checksum together.
  pub fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.store.delete(key)?;
    self.store.delete(&checksum_key(key))?;
    Ok(())
  }
}
