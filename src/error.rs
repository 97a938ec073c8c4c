//! Typed failure taxonomy for the offline layer.
//!
//! No failure in this subsystem is allowed to take down the host app: store
//! failures degrade to cache misses, remote failures degrade to stale cache
//! (reads) or the sync queue (mutations). The enums here exist so callers can
//! branch on those classes instead of string-matching messages.

use thiserror::Error;

/// Failure inside a key-value backend.
///
/// A failed write means "cache miss for future reads", never data loss: the
/// remote stays the source of truth and is always re-fetchable.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("storage backend unavailable: {0}")]
  Unavailable(String),

  #[error("storage i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("serialization error: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("storage lock poisoned")]
  LockPoisoned,
}

/// A remote call's failure, classified by whether the server ever answered.
///
/// The distinction drives every degradation decision: transport-class
/// failures fall back to stale cache (reads) or enqueue for replay
/// (mutations); application rejections propagate untouched.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
  /// No usable response: timeout, refused connection, DNS, a cut-off body.
  #[error("transport failure: {0}")]
  Transport(String),

  /// The server answered and rejected the request.
  #[error("remote rejected request ({status}): {message}")]
  Application { status: u16, message: String },
}

impl RemoteError {
  pub fn is_transport(&self) -> bool {
    matches!(self, RemoteError::Transport(_))
  }

  /// Whether retrying later could succeed. Server errors (5xx) count as
  /// retryable; client rejections (4xx) do not.
  pub fn is_retryable(&self) -> bool {
    match self {
      RemoteError::Transport(_) => true,
      RemoteError::Application { status, .. } => *status >= 500,
    }
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(String),

  #[error("failed to read config file {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("API token not set; export ACADHUB_API_TOKEN")]
  MissingToken,
}

/// Failure while wiring up an [`OfflineCache`](crate::OfflineCache).
#[derive(Debug, Error)]
pub enum SetupError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("failed to build http client: {0}")]
  HttpClient(String),
}
