use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::queue::RetryPolicy;
use crate::store::SqliteStore;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub network: NetworkConfig,
  pub queue: QueueConfig,
  pub storage: StorageConfig,
}

/// Advisory backend location and endpoint paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub weather_path: String,
  pub market_prices_path: String,
  pub alerts_path: String,
  pub farms_path: String,
  pub prices_path: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000".to_string(),
      weather_path: "/api/weather".to_string(),
      market_prices_path: "/api/market-prices".to_string(),
      alerts_path: "/api/alerts".to_string(),
      farms_path: "/api/farms".to_string(),
      prices_path: "/api/prices".to_string(),
    }
  }
}

impl ApiConfig {
  /// Resolve an endpoint path against `base_url`.
  pub fn endpoint(&self, path: &str) -> Result<Url> {
    let base = Url::parse(&self.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", self.base_url, e))?;
    base
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint path {}: {}", path, e))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Optional HEAD target used to confirm reachability beyond the OS flag
  pub health_url: Option<String>,
  pub request_timeout_secs: u64,
  pub probe_latency_ms: u64,
  pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      health_url: None,
      request_timeout_secs: 10,
      probe_latency_ms: 100,
      probe_timeout_ms: 3000,
    }
  }
}

impl NetworkConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn probe_latency(&self) -> Duration {
    Duration::from_millis(self.probe_latency_ms)
  }

  pub fn probe_timeout(&self) -> Duration {
    Duration::from_millis(self.probe_timeout_ms)
  }

  pub fn health_url(&self) -> Result<Option<Url>> {
    self
      .health_url
      .as_deref()
      .map(|raw| Url::parse(raw).map_err(|e| eyre!("Invalid network.health_url {}: {}", raw, e)))
      .transpose()
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub poll_interval_secs: u64,
  /// `null` retries forever
  pub max_attempts: Option<u32>,
  pub base_backoff_secs: u64,
  pub max_backoff_secs: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    let policy = RetryPolicy::default();
    Self {
      poll_interval_secs: 5,
      max_attempts: policy.max_attempts,
      base_backoff_secs: policy.base_backoff.as_secs(),
      max_backoff_secs: policy.max_backoff.as_secs(),
    }
  }
}

impl QueueConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs.max(1))
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.max_attempts,
      base_backoff: Duration::from_secs(self.base_backoff_secs),
      max_backoff: Duration::from_secs(self.max_backoff_secs),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/agrisync/store.db)
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  pub fn resolved_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStore::default_path(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./agrisync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/agrisync/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        tracing::debug!("config: no file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("agrisync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("agrisync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Get the API bearer token from the environment, if set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("AGRISYNC_API_TOKEN")
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}
