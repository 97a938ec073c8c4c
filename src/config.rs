use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Runtime configuration for the offline layer.
///
/// Every field has a sensible default, so an embedded caller can start from
/// `Config::default()` and override what it needs; apps load a yaml file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL of the remote API.
  pub base_url: String,
  /// Bound on any single network request, in seconds.
  pub request_timeout_secs: u64,
  /// Where durable cache state lives. Defaults to the platform data dir.
  pub data_dir: Option<PathBuf>,
  /// Replay attempts before a queue item is reported as exhausted.
  pub max_retries: u32,
  /// Default TTL for cached reads, in seconds.
  pub default_ttl_secs: u64,
  /// Age at which the global sweep evicts cache entries, in days.
  pub sweep_max_age_days: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:5000/api".to_string(),
      request_timeout_secs: 10,
      data_dir: None,
      max_retries: crate::storage::MAX_RETRIES,
      default_ttl_secs: 300,
      sweep_max_age_days: 30,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./acadhub.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/acadhub/offline.yaml
  ///
  /// With no file found anywhere, the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.display().to_string()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("acadhub.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("acadhub").join("offline.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.display().to_string(),
      source,
    })?;

    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
      path: path.display().to_string(),
      source,
    })
  }

  /// Get the API bearer token from the environment.
  ///
  /// Acquiring a token is the auth layer's job; this only forwards one that
  /// already exists.
  pub fn api_token() -> Result<String, ConfigError> {
    std::env::var("ACADHUB_API_TOKEN").map_err(|_| ConfigError::MissingToken)
  }

  /// Resolve the data directory for durable cache state.
  pub fn data_dir(&self) -> PathBuf {
    self.data_dir.clone().unwrap_or_else(|| {
      dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("acadhub")
    })
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }

  pub fn sweep_max_age(&self) -> Duration {
    Duration::from_secs(self.sweep_max_age_days * 24 * 60 * 60)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn defaults_are_usable() {
    let config = Config::default();
    assert_eq!(config.request_timeout(), Duration::from_secs(10));
    assert_eq!(config.default_ttl(), Duration::from_secs(300));
    assert_eq!(config.max_retries, 3);
    assert_eq!(config.sweep_max_age(), Duration::from_secs(30 * 24 * 60 * 60));
  }

  #[test]
  fn loads_partial_yaml_over_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "base_url: https://api.acadhub.example/v1").unwrap();
    writeln!(file, "default_ttl_secs: 60").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.base_url, "https://api.acadhub.example/v1");
    assert_eq!(config.default_ttl_secs, 60);
    // Untouched fields keep their defaults
    assert_eq!(config.request_timeout_secs, 10);
  }

  #[test]
  fn missing_explicit_path_is_an_error() {
    let result = Config::load(Some(Path::new("/nonexistent/acadhub.yaml")));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
  }
}
