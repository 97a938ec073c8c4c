//! The versioned cache envelope and the TTL policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Version stamped into every envelope; bump when the envelope shape changes.
pub const SCHEMA_VERSION: u32 = 1;

/// TTL presets for cached reads.
pub mod ttl {
  use std::time::Duration;

  pub const SHORT: Duration = Duration::from_secs(60);
  pub const MEDIUM: Duration = Duration::from_secs(5 * 60);
  pub const LONG: Duration = Duration::from_secs(60 * 60);
  pub const VERY_LONG: Duration = Duration::from_secs(24 * 60 * 60);
}

/// The envelope written to durable storage: payload plus the metadata needed
/// to judge its age later.
///
/// Records are replaced on refresh, never mutated in place. Age always comes
/// from the embedded timestamp; store metadata is not reliable across
/// backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
  pub data: Value,
  pub timestamp: DateTime<Utc>,
  pub version: u32,
}

impl CacheRecord {
  pub fn new(data: Value) -> Self {
    Self {
      data,
      timestamp: Utc::now(),
      version: SCHEMA_VERSION,
    }
  }

  pub fn age(&self) -> chrono::Duration {
    Utc::now().signed_duration_since(self.timestamp)
  }
}

/// Fresh means age strictly below the TTL. A timestamp in the future (clock
/// skew across restarts) counts as fresh; a zero TTL is immediately stale.
pub fn within_ttl(stored_at: DateTime<Utc>, ttl: Duration) -> bool {
  let age_ms = Utc::now().signed_duration_since(stored_at).num_milliseconds();
  age_ms < 0 || (age_ms as u128) < ttl.as_millis()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_record_is_current_and_versioned() {
    let record = CacheRecord::new(serde_json::json!({"n": 1}));
    assert_eq!(record.version, SCHEMA_VERSION);
    assert!(record.age().num_milliseconds() >= 0);
    assert!(within_ttl(record.timestamp, ttl::SHORT));
  }

  #[test]
  fn zero_ttl_is_immediately_stale() {
    assert!(!within_ttl(Utc::now(), Duration::ZERO));
  }

  #[test]
  fn old_entry_is_stale() {
    let stored_at = Utc::now() - chrono::Duration::minutes(10);
    assert!(!within_ttl(stored_at, ttl::MEDIUM));
    assert!(within_ttl(stored_at, ttl::LONG));
  }

  #[test]
  fn future_timestamp_counts_as_fresh() {
    let stored_at = Utc::now() + chrono::Duration::minutes(5);
    assert!(within_ttl(stored_at, Duration::ZERO));
  }

  #[test]
  fn envelope_roundtrips_through_json() {
    let record = CacheRecord::new(serde_json::json!(["a", "b"]));
    let bytes = serde_json::to_vec(&record).unwrap();
    let parsed: CacheRecord = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed.data, record.data);
    assert_eq!(parsed.timestamp, record.timestamp);
  }
}
