//! Offline-first data access layer for the AcadHub student apps.
//!
//! Serves API reads instantly from an in-process memory tier, falls back to a
//! checksummed durable tier and then the network, and queues failed mutations
//! for replay once connectivity returns. The remote stays the source of
//! truth; everything here is a cache of it, so no failure in this crate is
//! ever fatal to the host.
//!
//! The usual entry point is [`OfflineCache`]:
//!
//! ```no_run
//! use acadhub_offline::{Config, OfflineCache, RequestOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let cache = OfflineCache::open(&config)?;
//!
//! cache.prefetch_critical_data(&acadhub_offline::critical_targets()).await;
//! let dashboard = cache.get("/dashboard_data", RequestOptions::default()).await?;
//! println!("served from {:?}", dashboard.source);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod storage;

pub use api::{
  cache_key, critical_targets, ApiResponse, CacheSource, CacheStats, HttpExecutor, Method,
  OfflineCache, PrefetchOutcome, PrefetchTarget, RemoteExecutor, RemoteRequest, ReplayReport,
  RequestOptions,
};
pub use config::Config;
pub use error::{ConfigError, RemoteError, SetupError, StoreError};
pub use storage::{open_store, ttl, IntegrityStore, KVStore, QueueItem, SyncQueue};
