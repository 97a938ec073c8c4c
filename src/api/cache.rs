//! The request orchestrator: answers from the memory tier, the durable tier,
//! or the network, degrades across them on failure, and queues failed
//! mutations for replay.
//!
//! `OfflineCache` is an explicit, constructible object; inject it wherever it
//! is used so tests can run against fresh state and a scripted executor.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::error::{RemoteError, SetupError, StoreError};
use crate::storage::{open_store, within_ttl, IntegrityStore, KVStore, QueueItem, SyncQueue};

use super::executor::{HttpExecutor, Method, RemoteExecutor, RemoteRequest};
use super::key::{cache_key, CACHE_PREFIX};
use super::prefetch::{self, PrefetchOutcome, PrefetchTarget};

/// Which tier answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh entry in the in-process memory tier
  Memory,
  /// Fresh entry in the durable tier
  Storage,
  /// The remote answered
  Network,
  /// The remote failed; an expired durable entry was served instead
  Stale,
}

/// A served response plus where it came from.
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub data: Value,
  pub cached: bool,
  pub source: CacheSource,
  /// Set when the served durable entry failed its integrity check.
  pub corrupted: bool,
  /// The network error a stale response is papering over.
  pub error: Option<String>,
}

/// Per-request knobs. `Default` gives a plain cached `GET`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
  pub method: Method,
  pub body: Option<Value>,
  /// Maximum age before cached data stops satisfying fresh reads. `None`
  /// means the configured default.
  pub ttl: Option<Duration>,
  pub params: BTreeMap<String, String>,
  /// Skip both cache tiers on the read path.
  pub skip_cache: bool,
  /// Go to the network even when a fresh cached entry exists.
  pub force_refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
  pub memory_cache_size: usize,
  pub entries: Vec<String>,
}

/// Outcome of one `replay_queue` pass, by item id.
#[derive(Debug, Default)]
pub struct ReplayReport {
  /// Successfully replayed and dequeued
  pub replayed: Vec<String>,
  /// Transport-class failure again; retry count bumped, still queued
  pub retried: Vec<String>,
  /// Rejected by the server and dequeued; replaying a rejection would repeat
  /// it, not recover from an outage
  pub rejected: Vec<String>,
  /// At the retry limit. Still queued; disposal is the caller's policy
  pub exhausted: Vec<QueueItem>,
}

struct MemoryEntry {
  data: Value,
  cached_at: DateTime<Utc>,
}

/// The offline-first façade the UI talks to.
pub struct OfflineCache {
  executor: Arc<dyn RemoteExecutor>,
  storage: IntegrityStore,
  queue: Arc<SyncQueue>,
  memory: Arc<Mutex<HashMap<String, MemoryEntry>>>,
  default_ttl: Duration,
}

impl OfflineCache {
  pub fn new(executor: Arc<dyn RemoteExecutor>, store: Arc<dyn KVStore>, config: &Config) -> Self {
    let storage = IntegrityStore::new(store);
    let queue = Arc::new(SyncQueue::with_max_retries(storage.clone(), config.max_retries));

    Self {
      executor,
      storage,
      queue,
      memory: Arc::new(Mutex::new(HashMap::new())),
      default_ttl: config.default_ttl(),
    }
  }

  /// Open with the default HTTP executor and the capability-checked store.
  pub fn open(config: &Config) -> Result<Self, SetupError> {
    let store = open_store(&config.data_dir())?;
    let mut executor = HttpExecutor::new(config)?;
    if let Ok(token) = Config::api_token() {
      executor = executor.with_token(token);
    }
    Ok(Self::new(Arc::new(executor), store, config))
  }

  /// Serve a request, consulting memory, durable storage, then the network.
  ///
  /// Read path (`GET`), short-circuiting on the first hit:
  /// 1. memory tier, if fresh
  /// 2. durable tier, if fresh (also repopulates the memory tier)
  /// 3. the network; on success both tiers are written through, on a
  ///    transport-class failure the durable entry is served however stale,
  ///    with the error attached
  ///
  /// Mutations never touch the caches. A transport-class mutation failure is
  /// queued for replay and still propagated; the caller must be able to show
  /// that the mutation has not taken effect yet.
  pub async fn request(
    &self,
    endpoint: &str,
    options: RequestOptions,
  ) -> Result<ApiResponse, RemoteError> {
    let key = cache_key(endpoint, &options.params);
    let ttl = options.ttl.unwrap_or(self.default_ttl);
    let use_cache = options.method == Method::Get && !options.skip_cache && !options.force_refresh;

    if use_cache {
      if let Some(data) = self.memory_lookup(&key, ttl) {
        tracing::debug!("memory cache hit: {endpoint}");
        return Ok(ApiResponse {
          data,
          cached: true,
          source: CacheSource::Memory,
          corrupted: false,
          error: None,
        });
      }

      if let Some(entry) = self.storage.load::<Value>(&key) {
        if within_ttl(entry.stored_at, ttl) {
          tracing::debug!("storage cache hit: {endpoint}");
          // Corrupted entries are served flagged but never promoted to the
          // memory tier, which must stay a mirror of trusted state.
          if !entry.corrupted {
            self.memory_insert(&key, entry.data.clone());
          }
          return Ok(ApiResponse {
            data: entry.data,
            cached: true,
            source: CacheSource::Storage,
            corrupted: entry.corrupted,
            error: None,
          });
        }
      }
    }

    tracing::debug!("network request: {} {endpoint}", options.method);
    let remote = RemoteRequest {
      endpoint: endpoint.to_string(),
      method: options.method,
      params: options.params.clone(),
      body: options.body.clone(),
    };

    match self.executor.execute(remote).await {
      Ok(data) => {
        if options.method == Method::Get {
          self.memory_insert(&key, data.clone());
          if let Err(err) = self.storage.save(&key, &data) {
            // A failed write-through is a future cache miss, nothing more
            tracing::warn!("write-through failed for {endpoint}: {err}");
          }
        }
        Ok(ApiResponse {
          data,
          cached: false,
          source: CacheSource::Network,
          corrupted: false,
          error: None,
        })
      }
      Err(err) if options.method == Method::Get => {
        if err.is_retryable() {
          if let Some(entry) = self.storage.load::<Value>(&key) {
            tracing::warn!("serving stale cache for {endpoint}: {err}");
            return Ok(ApiResponse {
              data: entry.data,
              cached: true,
              source: CacheSource::Stale,
              corrupted: entry.corrupted,
              error: Some(err.to_string()),
            });
          }
        }
        Err(err)
      }
      Err(err) => {
        if err.is_retryable() {
          match self.queue.enqueue(endpoint, options.method, options.body.clone()) {
            Ok(id) => {
              tracing::warn!("{} {endpoint} failed, queued for replay as {id}", options.method)
            }
            Err(queue_err) => tracing::warn!(
              "{} {endpoint} failed and could not be queued: {queue_err}",
              options.method
            ),
          }
        }
        Err(err)
      }
    }
  }

  pub async fn get(&self, endpoint: &str, options: RequestOptions) -> Result<ApiResponse, RemoteError> {
    self
      .request(
        endpoint,
        RequestOptions {
          method: Method::Get,
          ..options
        },
      )
      .await
  }

  pub async fn post(
    &self,
    endpoint: &str,
    body: Value,
    options: RequestOptions,
  ) -> Result<ApiResponse, RemoteError> {
    self
      .request(
        endpoint,
        RequestOptions {
          method: Method::Post,
          body: Some(body),
          ..options
        },
      )
      .await
  }

  pub async fn put(
    &self,
    endpoint: &str,
    body: Value,
    options: RequestOptions,
  ) -> Result<ApiResponse, RemoteError> {
    self
      .request(
        endpoint,
        RequestOptions {
          method: Method::Put,
          body: Some(body),
          ..options
        },
      )
      .await
  }

  pub async fn delete(&self, endpoint: &str, options: RequestOptions) -> Result<ApiResponse, RemoteError> {
    self
      .request(
        endpoint,
        RequestOptions {
          method: Method::Delete,
          ..options
        },
      )
      .await
  }

  /// Warm the caches with the startup set, all-settled: one target failing
  /// never cancels or fails its siblings.
  pub async fn prefetch_critical_data(&self, targets: &[PrefetchTarget]) -> Vec<PrefetchOutcome> {
    prefetch::prefetch_all(self, targets).await
  }

  /// Replay pending mutations, oldest first. Best-effort: every item gets its
  /// attempt and the report says what happened to each.
  pub async fn replay_queue(&self) -> ReplayReport {
    let mut report = ReplayReport::default();

    for item in self.queue.list() {
      if item.retry_count >= self.queue.max_retries() {
        report.exhausted.push(item);
        continue;
      }

      let request = RemoteRequest {
        endpoint: item.endpoint.clone(),
        method: item.method,
        params: BTreeMap::new(),
        body: item.body.clone(),
      };

      match self.executor.execute(request).await {
        Ok(_) => {
          tracing::debug!("replayed {} {}", item.method, item.endpoint);
          if let Err(err) = self.queue.remove(&item.id) {
            tracing::warn!("replayed {} but could not dequeue it: {err}", item.id);
          }
          report.replayed.push(item.id);
        }
        Err(err) if err.is_retryable() => {
          if let Err(store_err) = self.queue.increment_retry(&item.id) {
            tracing::warn!("could not record retry for {}: {store_err}", item.id);
          }
          report.retried.push(item.id);
        }
        Err(err) => {
          tracing::warn!("dropping rejected {} {} from the queue: {err}", item.method, item.endpoint);
          if let Err(store_err) = self.queue.remove(&item.id) {
            tracing::warn!("could not dequeue rejected item {}: {store_err}", item.id);
          }
          report.rejected.push(item.id);
        }
      }
    }

    report
  }

  /// Drop the cached entry for `(endpoint, params)` from both tiers. A no-op
  /// when nothing is cached.
  pub fn clear_cache(
    &self,
    endpoint: &str,
    params: &BTreeMap<String, String>,
  ) -> Result<(), StoreError> {
    let key = cache_key(endpoint, params);
    {
      let mut memory = self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
      memory.remove(&key);
    }
    self.storage.remove(&key)
  }

  /// Drop every cached entry from both tiers. The sync queue is not a cache
  /// and is left alone.
  pub fn clear_all_caches(&self) -> Result<(), StoreError> {
    self.clear_memory();
    for key in self.storage.store().list_keys()? {
      if key.starts_with(CACHE_PREFIX) && !key.ends_with("_checksum") {
        self.storage.remove(&key)?;
      }
    }
    Ok(())
  }

  /// Drop the memory tier only; durable entries are untouched.
  pub fn clear_memory(&self) {
    let mut memory = self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    memory.clear();
  }

  /// Evict durable cache entries older than `max_age`. Never touches the
  /// queue key. Returns how many entries were evicted.
  pub fn sweep_expired(&self, max_age: Duration) -> Result<usize, StoreError> {
    let mut removed = 0;

    for key in self.storage.store().list_keys()? {
      if !key.starts_with(CACHE_PREFIX) || key.ends_with("_checksum") {
        continue;
      }
      let age = match self.storage.data_age(&key) {
        Some(age) => age,
        None => continue,
      };
      if age.num_milliseconds() >= 0 && (age.num_milliseconds() as u128) > max_age.as_millis() {
        self.storage.remove(&key)?;
        let mut memory = self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        memory.remove(&key);
        removed += 1;
      }
    }

    if removed > 0 {
      tracing::debug!("swept {removed} expired cache entries");
    }
    Ok(removed)
  }

  pub fn cache_stats(&self) -> CacheStats {
    let memory = self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut entries: Vec<String> = memory.keys().cloned().collect();
    entries.sort();
    CacheStats {
      memory_cache_size: entries.len(),
      entries,
    }
  }

  /// Queue-inspection hook for the UI (pending count, exhausted items).
  pub fn sync_queue(&self) -> &SyncQueue {
    &self.queue
  }

  /// Push any deferred store persistence to disk, e.g. before shutdown.
  pub fn flush(&self) -> Result<(), StoreError> {
    self.storage.store().flush()
  }

  fn memory_lookup(&self, key: &str, ttl: Duration) -> Option<Value> {
    let memory = self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let entry = memory.get(key)?;
    within_ttl(entry.cached_at, ttl).then(|| entry.data.clone())
  }

  fn memory_insert(&self, key: &str, data: Value) {
    let mut memory = self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    memory.insert(
      key.to_string(),
      MemoryEntry {
        data,
        cached_at: Utc::now(),
      },
    );
  }
}

impl Clone for OfflineCache {
  fn clone(&self) -> Self {
    Self {
      executor: Arc::clone(&self.executor),
      storage: self.storage.clone(),
      queue: Arc::clone(&self.queue),
      memory: Arc::clone(&self.memory),
      default_ttl: self.default_ttl,
    }
  }
}
