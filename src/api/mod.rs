//! The request side of the offline layer: the orchestrator façade the UI
//! talks to, the executor seam it fetches through, deterministic cache-key
//! derivation, and the startup prefetch coordinator.

mod cache;
mod executor;
mod key;
mod prefetch;

pub use cache::{ApiResponse, CacheSource, CacheStats, OfflineCache, ReplayReport, RequestOptions};
pub use executor::{HttpExecutor, Method, RemoteExecutor, RemoteRequest};
pub use key::{cache_key, CACHE_PREFIX};
pub use prefetch::{critical_targets, PrefetchOutcome, PrefetchTarget};
