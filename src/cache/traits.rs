//! Result types for read-through cache operations.

use chrono::{DateTime, Utc};
use std::fmt;

/// A domain payload plus provenance, so callers can label stale advisories
/// and prices as such.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// Envelope timestamp; `None` for payloads fetched just now
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Entry served within its domain TTL.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Expired entry served because the backend could not be reached.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Whole minutes since the data was cached, for "cached Nm ago" labels.
  pub fn age_minutes(&self) -> Option<i64> {
    self.cached_at.map(|at| (Utc::now() - at).num_minutes())
  }
}

/// How a read-through call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the advisory backend on this call
  Network,
  /// Stored entry still within its TTL
  CacheFresh,
  /// Backend unreachable, serving an expired entry
  Offline,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      CacheSource::Network => "network",
      CacheSource::CacheFresh => "cache",
      CacheSource::Offline => "offline",
    };
    write!(f, "{}", label)
  }
}
