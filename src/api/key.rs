//! Deterministic cache-key derivation.

use std::collections::BTreeMap;

/// Namespace prefix for durable cache entries. The sync queue lives outside
/// it, so sweeps and `clear_all_caches` can match on the prefix alone.
pub const CACHE_PREFIX: &str = "api_cache_";

/// Derive the cache key for `(endpoint, params)`.
///
/// Params come in as a `BTreeMap`, so the serialized form is ordered by key
/// and two maps that are equal as sets of pairs always produce the same
/// string regardless of insertion order. This exact function runs on the
/// write-through and on every read; if the two ever diverged, entries would
/// become permanently unreachable.
pub fn cache_key(endpoint: &str, params: &BTreeMap<String, String>) -> String {
  let serialized = serde_json::to_string(params).unwrap_or_default();
  format!("{CACHE_PREFIX}{endpoint}_{serialized}")
}
