//! Queued request records and retry policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Methods the queue knows how to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
  Get,
  Post,
}

impl HttpMethod {
  pub fn as_reqwest(self) -> reqwest::Method {
    match self {
      HttpMethod::Get => reqwest::Method::GET,
      HttpMethod::Post => reqwest::Method::POST,
    }
  }
}

impl fmt::Display for HttpMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HttpMethod::Get => write!(f, "GET"),
      HttpMethod::Post => write!(f, "POST"),
    }
  }
}

impl std::str::FromStr for HttpMethod {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(HttpMethod::Get),
      "POST" => Ok(HttpMethod::Post),
      other => Err(format!("unsupported method {}", other)),
    }
  }
}

/// A request as handed to [`RequestQueue::enqueue`](super::RequestQueue::enqueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
  pub url: String,
  pub method: HttpMethod,
  pub headers: Option<BTreeMap<String, String>>,
  pub body: Option<String>,
}

/// A pending outbound request persisted in the durable queue.
///
/// `id`, `created_at`, `url`, `method`, `headers` and `body` never change after
/// enqueue. The remaining fields are retry bookkeeping owned by the drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
  pub id: Uuid,
  pub created_at: DateTime<Utc>,
  pub url: String,
  pub method: HttpMethod,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub headers: Option<BTreeMap<String, String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  /// Failed delivery attempts so far
  #[serde(default)]
  pub attempts: u32,
  /// Earliest time the next attempt may be made
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_attempt_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
}

impl QueuedRequest {
  pub(crate) fn from_new(request: NewRequest, now: DateTime<Utc>) -> Self {
    Self {
      id: Uuid::new_v4(),
      created_at: now,
      url: request.url,
      method: request.method,
      headers: request.headers,
      body: request.body,
      attempts: 0,
      next_attempt_at: None,
      last_error: None,
    }
  }

  /// Whether backoff forbids sending this entry at `now`.
  pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
    self.next_attempt_at.is_some_and(|at| at > now)
  }
}

/// How often a failing entry is retried before it is dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// `None` retries forever
  pub max_attempts: Option<u32>,
  pub base_backoff: Duration,
  pub max_backoff: Duration,
}

impl RetryPolicy {
  /// Retry forever with no backoff between drains.
  pub fn unbounded() -> Self {
    Self {
      max_attempts: None,
      base_backoff: Duration::ZERO,
      max_backoff: Duration::ZERO,
    }
  }

  /// Delay before the next attempt after `attempts` failures.
  pub fn backoff(&self, attempts: u32) -> Duration {
    if attempts == 0 || self.base_backoff.is_zero() {
      return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
    self
      .base_backoff
      .checked_mul(factor)
      .unwrap_or(self.max_backoff)
      .min(self.max_backoff)
  }

  pub fn is_exhausted(&self, attempts: u32) -> bool {
    self.max_attempts.is_some_and(|max| attempts >= max)
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: Some(8),
      base_backoff: Duration::from_secs(5),
      max_backoff: Duration::from_secs(600),
    }
  }
}

/// Outcome counters of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Another drain was in flight; this one did nothing
  pub skipped: bool,
  /// The probe reported offline; nothing was sent
  pub offline: bool,
  pub delivered: usize,
  pub retained: usize,
  /// Entries not attempted because their backoff has not elapsed
  pub deferred: usize,
  pub dead_lettered: usize,
}

impl DrainReport {
  pub(crate) fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }

  pub(crate) fn offline() -> Self {
    Self {
      offline: true,
      ..Self::default()
    }
  }

  pub fn attempted(&self) -> usize {
    self.delivered + self.retained + self.dead_lettered
  }
}
