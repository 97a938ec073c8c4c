//! Durable storage for the offline layer.
//!
//! This module provides:
//! - Opaque key-value backends behind one trait, picked once at startup
//! - A checksum layer that detects silent corruption of persisted entries
//! - The versioned cache envelope and its TTL policy
//! - The durable FIFO queue of mutations awaiting replay

mod backend;
mod integrity;
mod mirror;
mod queue;
mod record;
mod sqlite;

pub use backend::{open_store, KVStore};
pub use integrity::{checksum_key, IntegrityStore, Verified};
pub use mirror::MirrorStore;
pub use queue::{QueueItem, SyncQueue, MAX_RETRIES, SYNC_QUEUE_KEY};
pub use record::{ttl, within_ttl, CacheRecord, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

pub(crate) use integrity::digest;
