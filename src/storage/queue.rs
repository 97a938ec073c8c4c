//! Durable FIFO queue of mutating requests that could not reach the remote.
//!
//! The whole queue lives under one well-known key as an ordered list, and
//! every operation is a full read-modify-write of that list through the
//! integrity layer. Expected depth is small (client-side, single user), so
//! there is no secondary index. The read-modify-write is the one mandatory
//! critical section in the core: two mutation failures enqueueing at the same
//! time would otherwise lose an item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use uuid::Uuid;

use crate::api::Method;
use crate::error::StoreError;

use super::integrity::IntegrityStore;

/// Storage key the queue persists under. Sits outside the `api_cache_`
/// namespace so cache sweeps never touch it.
pub const SYNC_QUEUE_KEY: &str = "sync_queue";

/// Replay attempts before an item is reported as exhausted. Exhausted items
/// are never dropped here; what to do with them is the caller's policy.
pub const MAX_RETRIES: u32 = 3;

/// A pending mutation awaiting replay.
///
/// Removed only after a confirmed successful replay or an explicit operator
/// purge; `retry_count` only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
  pub id: String,
  pub endpoint: String,
  pub method: Method,
  #[serde(default)]
  pub body: Option<Value>,
  pub enqueued_at: DateTime<Utc>,
  pub retry_count: u32,
}

pub struct SyncQueue {
  storage: IntegrityStore,
  /// Serializes the read-modify-write of the persisted list.
  lock: Mutex<()>,
  max_retries: u32,
}

impl SyncQueue {
  pub fn new(storage: IntegrityStore) -> Self {
    Self::with_max_retries(storage, MAX_RETRIES)
  }

  pub fn with_max_retries(storage: IntegrityStore, max_retries: u32) -> Self {
    Self {
      storage,
      lock: Mutex::new(()),
      max_retries,
    }
  }

  pub fn max_retries(&self) -> u32 {
    self.max_retries
  }

  /// Append a failed mutation to the queue. Returns the new item's id.
  pub fn enqueue(
    &self,
    endpoint: &str,
    method: Method,
    body: Option<Value>,
  ) -> Result<String, StoreError> {
    let _guard = self.lock.lock().map_err(|_| StoreError::LockPoisoned)?;
    let mut items = self.read_items();

    let item = QueueItem {
      id: Uuid::now_v7().to_string(),
      endpoint: endpoint.to_string(),
      method,
      body,
      enqueued_at: Utc::now(),
      retry_count: 0,
    };
    let id = item.id.clone();
    items.push(item);

    self.write_items(&items)?;
    tracing::debug!("queued {method} {endpoint} for replay as {id}");
    Ok(id)
  }

  /// All pending items, oldest first.
  pub fn list(&self) -> Vec<QueueItem> {
    let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    self.read_items()
  }

  /// Remove an item, after a confirmed replay or an operator purge. Removing
  /// an id that is not queued is a no-op.
  pub fn remove(&self, id: &str) -> Result<(), StoreError> {
    let _guard = self.lock.lock().map_err(|_| StoreError::LockPoisoned)?;
    let mut items = self.read_items();
    items.retain(|item| item.id != id);
    self.write_items(&items)
  }

  /// Record one more failed replay attempt for `id`.
  pub fn increment_retry(&self, id: &str) -> Result<(), StoreError> {
    let _guard = self.lock.lock().map_err(|_| StoreError::LockPoisoned)?;
    let mut items = self.read_items();
    if let Some(item) = items.iter_mut().find(|item| item.id == id) {
      item.retry_count += 1;
    }
    self.write_items(&items)
  }

  /// Items at or past the retry limit. Reported, never auto-dropped.
  pub fn exhausted(&self) -> Vec<QueueItem> {
    self
      .list()
      .into_iter()
      .filter(|item| item.retry_count >= self.max_retries)
      .collect()
  }

  pub fn len(&self) -> usize {
    self.list().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn read_items(&self) -> Vec<QueueItem> {
    match self.storage.load::<Vec<QueueItem>>(SYNC_QUEUE_KEY) {
      Some(verified) => {
        if verified.corrupted {
          tracing::warn!("sync queue failed its integrity check; continuing with the stored items");
        }
        verified.data
      }
      None => Vec::new(),
    }
  }

  fn write_items(&self, items: &[QueueItem]) -> Result<(), StoreError> {
    self.storage.save(SYNC_QUEUE_KEY, &items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::backend::KVStore;
  use crate::storage::MirrorStore;
  use serde_json::json;
  use std::sync::Arc;

  fn open_queue(dir: &std::path::Path) -> SyncQueue {
    let store = MirrorStore::open(dir).unwrap();
    SyncQueue::new(IntegrityStore::new(Arc::new(store)))
  }

  #[test]
  fn enqueue_preserves_fifo_order() {
    let dir = tempfile::tempdir().unwrap();
    let queue = open_queue(dir.path());

    queue.enqueue("/mark_attendance", Method::Post, Some(json!({"s": 1}))).unwrap();
    queue.enqueue("/update_profile", Method::Put, Some(json!({"n": "x"}))).unwrap();
    queue.enqueue("/notes/3", Method::Delete, None).unwrap();

    let items = queue.list();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].endpoint, "/mark_attendance");
    assert_eq!(items[1].endpoint, "/update_profile");
    assert_eq!(items[2].endpoint, "/notes/3");
    assert!(items[0].enqueued_at <= items[1].enqueued_at);

    let ids: std::collections::HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids.len(), 3);
  }

  #[test]
  fn remove_drops_only_the_given_item() {
    let dir = tempfile::tempdir().unwrap();
    let queue = open_queue(dir.path());

    queue.enqueue("/a", Method::Post, None).unwrap();
    let id = queue.enqueue("/b", Method::Post, None).unwrap();
    queue.enqueue("/c", Method::Post, None).unwrap();

    queue.remove(&id).unwrap();
    let endpoints: Vec<String> = queue.list().into_iter().map(|i| i.endpoint).collect();
    assert_eq!(endpoints, vec!["/a".to_string(), "/c".to_string()]);

    // Removing an unknown id is a no-op
    queue.remove("no-such-id").unwrap();
    assert_eq!(queue.len(), 2);
  }

  #[test]
  fn retry_count_only_grows() {
    let dir = tempfile::tempdir().unwrap();
    let queue = open_queue(dir.path());

    let id = queue.enqueue("/a", Method::Post, None).unwrap();
    queue.increment_retry(&id).unwrap();
    queue.increment_retry(&id).unwrap();

    assert_eq!(queue.list()[0].retry_count, 2);
    assert!(queue.exhausted().is_empty());

    queue.increment_retry(&id).unwrap();
    let exhausted = queue.exhausted();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].id, id);
    // Exhausted items stay queued
    assert_eq!(queue.len(), 1);
  }

  #[test]
  fn queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let endpoints = ["/mark_attendance", "/update_profile", "/notes/3"];
    {
      let store = Arc::new(MirrorStore::open(dir.path()).unwrap());
      let queue = SyncQueue::new(IntegrityStore::new(store.clone()));
      for endpoint in endpoints {
        queue.enqueue(endpoint, Method::Post, Some(json!({"e": endpoint}))).unwrap();
      }
      store.flush().unwrap();
    }

    // Reload purely from the durable backing
    let queue = open_queue(dir.path());
    let items = queue.list();
    assert_eq!(items.len(), 3);
    for (item, endpoint) in items.iter().zip(endpoints) {
      assert_eq!(item.endpoint, endpoint);
      assert_eq!(item.retry_count, 0);
    }
  }

  #[test]
  fn concurrent_enqueues_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(open_queue(dir.path()));

    let handles: Vec<_> = (0..4)
      .map(|n| {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || {
          for i in 0..4 {
            queue.enqueue(&format!("/op/{n}/{i}"), Method::Post, None).unwrap();
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    assert_eq!(queue.len(), 16);
  }
}
