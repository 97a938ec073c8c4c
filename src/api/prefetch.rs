//! Bulk/prefetch coordinator: fires a fixed set of startup requests
//! concurrently and tolerates individual failures.

use futures::future::join_all;
use std::time::Duration;

use crate::error::RemoteError;
use crate::storage::ttl;

use super::cache::{CacheSource, OfflineCache, RequestOptions};

#[derive(Debug, Clone)]
pub struct PrefetchTarget {
  pub endpoint: String,
  pub ttl: Duration,
}

impl PrefetchTarget {
  pub fn new(endpoint: impl Into<String>, ttl: Duration) -> Self {
    Self {
      endpoint: endpoint.into(),
      ttl,
    }
  }
}

/// Settled outcome of one prefetch target.
#[derive(Debug)]
pub struct PrefetchOutcome {
  pub endpoint: String,
  pub result: Result<CacheSource, RemoteError>,
}

impl PrefetchOutcome {
  pub fn is_ok(&self) -> bool {
    self.result.is_ok()
  }
}

/// The startup set: what the dashboard needs before first paint.
pub fn critical_targets() -> Vec<PrefetchTarget> {
  vec![
    PrefetchTarget::new("current_user", ttl::LONG),
    PrefetchTarget::new("preferences", ttl::LONG),
    PrefetchTarget::new("dashboard_data", ttl::MEDIUM),
    PrefetchTarget::new("notifications", ttl::SHORT),
  ]
}

/// Drive all targets through the orchestrator concurrently, all-settled: each
/// future catches its own failure, so one bad endpoint never cancels or fails
/// its siblings and the coordinator itself never raises.
pub(crate) async fn prefetch_all(
  cache: &OfflineCache,
  targets: &[PrefetchTarget],
) -> Vec<PrefetchOutcome> {
  let requests = targets.iter().map(|target| async move {
    let options = RequestOptions {
      ttl: Some(target.ttl),
      ..RequestOptions::default()
    };
    let result = match cache.request(&target.endpoint, options).await {
      Ok(response) => Ok(response.source),
      Err(err) => {
        tracing::warn!("prefetch of {} failed: {err}", target.endpoint);
        Err(err)
      }
    };
    PrefetchOutcome {
      endpoint: target.endpoint.clone(),
      result,
    }
  });

  join_all(requests).await
}
