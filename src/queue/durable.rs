//! Durable FIFO queue of pending requests.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::net::{ConnectivityProbe, FetchError};
use crate::store::KvStore;

use super::request::{DrainReport, NewRequest, QueuedRequest, RetryPolicy};
use super::sender::RequestSender;

const QUEUE_KEY: &str = "offline_queue";
const DEAD_LETTER_KEY: &str = "offline_queue_dead_letter";

/// What happened to one entry during a drain pass.
enum Outcome {
  Delivered,
  Failed(String),
  Rejected(String),
  Cancelled,
}

/// Persistent request queue with single-flight draining.
///
/// The whole list lives under one store key and is always rewritten as a
/// unit. Entries that keep failing accumulate attempts and are moved to a
/// dead-letter list once the [`RetryPolicy`] gives up on them.
pub struct RequestQueue {
  store: Arc<dyn KvStore>,
  probe: Arc<dyn ConnectivityProbe>,
  policy: RetryPolicy,
  /// Serializes read-modify-write cycles on the stored lists
  write_lock: Mutex<()>,
  drain_lock: tokio::sync::Mutex<()>,
}

impl RequestQueue {
  pub fn new(store: Arc<dyn KvStore>, probe: Arc<dyn ConnectivityProbe>) -> Self {
    Self {
      store,
      probe,
      policy: RetryPolicy::default(),
      write_lock: Mutex::new(()),
      drain_lock: tokio::sync::Mutex::new(()),
    }
  }

  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Append a request. Returns the stored record with its id and timestamp.
  pub fn enqueue(&self, request: NewRequest) -> Result<QueuedRequest> {
    let record = QueuedRequest::from_new(request, Utc::now());

    let _guard = self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut entries = self.read_list(QUEUE_KEY)?;
    entries.push(record.clone());
    self.write_list(QUEUE_KEY, &entries)?;

    tracing::info!(
      "queue: stored {} {} as {} ({} pending)",
      record.method,
      record.url,
      record.id,
      entries.len()
    );
    Ok(record)
  }

  /// Pending requests in replay order.
  pub fn pending(&self) -> Result<Vec<QueuedRequest>> {
    self.read_list(QUEUE_KEY)
  }

  /// Requests the retry policy gave up on, oldest first.
  pub fn dead_letters(&self) -> Result<Vec<QueuedRequest>> {
    self.read_list(DEAD_LETTER_KEY)
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.pending()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Drop every pending request.
  pub fn clear(&self) -> Result<()> {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    self.store.remove(QUEUE_KEY)
  }

  /// Drop every dead-lettered request, leaving the pending queue alone.
  pub fn clear_dead_letters(&self) -> Result<()> {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    self.store.remove(DEAD_LETTER_KEY)
  }

  /// Move dead letters back to the end of the pending queue with a fresh
  /// retry budget. Returns how many were moved.
  pub fn requeue_dead_letters(&self) -> Result<usize> {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let dead = self.read_list(DEAD_LETTER_KEY)?;
    if dead.is_empty() {
      return Ok(0);
    }

    let mut pending = self.read_list(QUEUE_KEY)?;
    let moved = dead.len();
    pending.extend(dead.into_iter().map(|mut entry| {
      entry.attempts = 0;
      entry.next_attempt_at = None;
      entry
    }));

    self.write_list(QUEUE_KEY, &pending)?;
    self.store.remove(DEAD_LETTER_KEY)?;
    Ok(moved)
  }

  /// Replay pending requests through `sender`, in FIFO order.
  ///
  /// No-op while offline or while another drain is running. Delivered
  /// entries are removed; failing ones stay in place (or are dead-lettered)
  /// and requests enqueued during the pass are kept.
  pub async fn drain(&self, sender: &dyn RequestSender) -> Result<DrainReport> {
    let Ok(_drain_guard) = self.drain_lock.try_lock() else {
      tracing::debug!("queue: drain already in flight, skipping");
      return Ok(DrainReport::skipped());
    };

    if !self.probe.probe().await {
      tracing::debug!("queue: offline, drain postponed");
      return Ok(DrainReport::offline());
    }

    let snapshot = self.pending()?;
    if snapshot.is_empty() {
      return Ok(DrainReport::default());
    }

    let now = Utc::now();
    let mut report = DrainReport::default();
    let mut outcomes: HashMap<Uuid, Outcome> = HashMap::new();

    for entry in &snapshot {
      if entry.is_deferred(now) {
        report.deferred += 1;
        continue;
      }

      let outcome = match sender.send(entry).await {
        Ok(()) => Outcome::Delivered,
        Err(FetchError::Cancelled) => Outcome::Cancelled,
        Err(e) if e.is_retryable() => {
          tracing::debug!("queue: replay of {} failed: {}", entry.id, e);
          Outcome::Failed(e.to_string())
        }
        Err(e) => {
          tracing::warn!("queue: {} {} rejected: {}", entry.method, entry.url, e);
          Outcome::Rejected(e.to_string())
        }
      };
      outcomes.insert(entry.id, outcome);
    }

    self.commit(outcomes, now, &mut report)?;

    tracing::info!(
      "queue: drain delivered {}, retained {}, deferred {}, dead-lettered {}",
      report.delivered,
      report.retained,
      report.deferred,
      report.dead_lettered
    );
    Ok(report)
  }

  /// Apply drain outcomes to the currently stored queue.
  fn commit(
    &self,
    mut outcomes: HashMap<Uuid, Outcome>,
    now: DateTime<Utc>,
    report: &mut DrainReport,
  ) -> Result<()> {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let current = self.read_list(QUEUE_KEY)?;
    let mut dead = self.read_list(DEAD_LETTER_KEY)?;
    let dead_before = dead.len();
    let mut retained = Vec::with_capacity(current.len());

    for mut entry in current {
      match outcomes.remove(&entry.id) {
        // Deferred, or enqueued after the snapshot was taken
        None | Some(Outcome::Cancelled) => retained.push(entry),
        Some(Outcome::Delivered) => report.delivered += 1,
        Some(Outcome::Failed(error)) => {
          entry.attempts += 1;
          entry.last_error = Some(error);
          if self.policy.is_exhausted(entry.attempts) {
            tracing::warn!(
              "queue: giving up on {} {} after {} attempts",
              entry.method,
              entry.url,
              entry.attempts
            );
            dead.push(entry);
          } else {
            let backoff = self.policy.backoff(entry.attempts);
            entry.next_attempt_at = if backoff.is_zero() {
              None
            } else {
              Some(now + chrono::Duration::milliseconds(backoff.as_millis() as i64))
            };
            report.retained += 1;
            retained.push(entry);
          }
        }
        Some(Outcome::Rejected(error)) => {
          entry.attempts += 1;
          entry.last_error = Some(error);
          dead.push(entry);
        }
      }
    }

    report.dead_lettered = dead.len() - dead_before;

    self.write_list(QUEUE_KEY, &retained)?;
    if report.dead_lettered > 0 {
      self.write_list(DEAD_LETTER_KEY, &dead)?;
    }
    Ok(())
  }

  fn read_list(&self, key: &str) -> Result<Vec<QueuedRequest>> {
    let Some(raw) = self.store.get(key)? else {
      return Ok(Vec::new());
    };

    match serde_json::from_str(&raw) {
      Ok(entries) => Ok(entries),
      Err(e) => {
        // Unreadable lists are replaced on the next write
        tracing::warn!("queue: discarding unreadable {}: {}", key, e);
        Ok(Vec::new())
      }
    }
  }

  fn write_list(&self, key: &str, entries: &[QueuedRequest]) -> Result<()> {
    if entries.is_empty() {
      return self.store.remove(key);
    }
    let raw =
      serde_json::to_string(entries).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    self.store.set(key, &raw)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::{Connectivity, NetworkStatus};
  use crate::queue::request::HttpMethod;
  use crate::store::{MemoryStore, SqliteStore};
  use async_trait::async_trait;
  use reqwest::StatusCode;
  use std::collections::HashSet;
  use std::time::Duration;
  use tokio::sync::Notify;

  /// Sender that fails for configured URLs and records every call.
  #[derive(Default)]
  struct ScriptedSender {
    failing: HashSet<String>,
    rejecting: HashSet<String>,
    calls: Mutex<Vec<String>>,
  }

  impl ScriptedSender {
    fn failing(urls: &[&str]) -> Self {
      Self {
        failing: urls.iter().map(|u| u.to_string()).collect(),
        ..Self::default()
      }
    }

    fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl RequestSender for ScriptedSender {
    async fn send(&self, request: &QueuedRequest) -> std::result::Result<(), FetchError> {
      self.calls.lock().unwrap().push(request.url.clone());
      if self.failing.contains(&request.url) {
        return Err(FetchError::Unreachable("connection refused".into()));
      }
      if self.rejecting.contains(&request.url) {
        return Err(FetchError::Rejected {
          status: StatusCode::BAD_REQUEST,
          body: "invalid".into(),
        });
      }
      Ok(())
    }
  }

  fn post(url: &str) -> NewRequest {
    NewRequest {
      url: url.to_string(),
      method: HttpMethod::Post,
      headers: None,
      body: Some(format!("{{\"url\":\"{}\"}}", url)),
    }
  }

  fn queue_with(store: Arc<dyn KvStore>, status: &NetworkStatus) -> RequestQueue {
    let probe = Connectivity::new(status.clone()).with_min_latency(Duration::ZERO);
    RequestQueue::new(store, Arc::new(probe))
  }

  fn urls(entries: &[QueuedRequest]) -> Vec<String> {
    entries.iter().map(|e| e.url.clone()).collect()
  }

  #[test]
  fn test_queue_survives_reopen() {
    let path = std::env::temp_dir().join(format!("agrisync-queue-{}.db", Uuid::new_v4()));
    let status = NetworkStatus::new(true);

    let stored = {
      let queue = queue_with(Arc::new(SqliteStore::open(&path).unwrap()), &status);
      vec![
        queue.enqueue(post("/a")).unwrap(),
        queue.enqueue(post("/b")).unwrap(),
        queue.enqueue(post("/c")).unwrap(),
      ]
    };

    let reopened = queue_with(Arc::new(SqliteStore::open(&path).unwrap()), &status);
    assert_eq!(reopened.pending().unwrap(), stored);

    let _ = std::fs::remove_file(&path);
  }

  #[tokio::test]
  async fn test_drain_removes_successes_and_retains_failures() {
    let status = NetworkStatus::new(true);
    let queue = queue_with(Arc::new(MemoryStore::new()), &status).with_policy(RetryPolicy::unbounded());
    queue.enqueue(post("/a")).unwrap();
    queue.enqueue(post("/b")).unwrap();
    queue.enqueue(post("/c")).unwrap();

    let sender = ScriptedSender::failing(&["/b"]);
    let report = queue.drain(&sender).await.unwrap();

    assert_eq!(sender.calls(), vec!["/a", "/b", "/c"]);
    assert_eq!(urls(&queue.pending().unwrap()), vec!["/b"]);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.retained, 1);

    let remaining = &queue.pending().unwrap()[0];
    assert_eq!(remaining.attempts, 1);
    assert!(remaining.last_error.is_some());
  }

  #[tokio::test]
  async fn test_drain_is_noop_while_offline() {
    let status = NetworkStatus::new(false);
    let queue = queue_with(Arc::new(MemoryStore::new()), &status);
    queue.enqueue(post("/a")).unwrap();

    let sender = ScriptedSender::default();
    let report = queue.drain(&sender).await.unwrap();

    assert!(report.offline);
    assert!(sender.calls().is_empty());
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_rejected_requests_are_dead_lettered() {
    let status = NetworkStatus::new(true);
    let queue = queue_with(Arc::new(MemoryStore::new()), &status);
    queue.enqueue(post("/bad")).unwrap();
    queue.enqueue(post("/good")).unwrap();

    let sender = ScriptedSender {
      rejecting: ["/bad".to_string()].into_iter().collect(),
      ..ScriptedSender::default()
    };
    let report = queue.drain(&sender).await.unwrap();

    assert_eq!(report.dead_lettered, 1);
    assert!(queue.is_empty().unwrap());
    assert_eq!(urls(&queue.dead_letters().unwrap()), vec!["/bad"]);
  }

  #[tokio::test]
  async fn test_exhausted_retries_move_to_dead_letter() {
    let status = NetworkStatus::new(true);
    let policy = RetryPolicy {
      max_attempts: Some(2),
      ..RetryPolicy::unbounded()
    };
    let queue = queue_with(Arc::new(MemoryStore::new()), &status).with_policy(policy);
    queue.enqueue(post("/flaky")).unwrap();

    let sender = ScriptedSender::failing(&["/flaky"]);
    queue.drain(&sender).await.unwrap();
    assert_eq!(queue.len().unwrap(), 1);

    let report = queue.drain(&sender).await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert!(queue.is_empty().unwrap());

    let dead = queue.dead_letters().unwrap();
    assert_eq!(dead[0].attempts, 2);

    assert_eq!(queue.requeue_dead_letters().unwrap(), 1);
    assert!(queue.dead_letters().unwrap().is_empty());
    assert_eq!(queue.pending().unwrap()[0].attempts, 0);
  }

  #[tokio::test]
  async fn test_clearing_dead_letters_keeps_pending() {
    let status = NetworkStatus::new(true);
    let queue = queue_with(Arc::new(MemoryStore::new()), &status);
    queue.enqueue(post("/bad")).unwrap();

    let sender = ScriptedSender {
      rejecting: ["/bad".to_string()].into_iter().collect(),
      ..ScriptedSender::default()
    };
    queue.drain(&sender).await.unwrap();
    queue.enqueue(post("/later")).unwrap();

    queue.clear_dead_letters().unwrap();
    assert!(queue.dead_letters().unwrap().is_empty());
    assert_eq!(urls(&queue.pending().unwrap()), vec!["/later"]);
  }

  #[tokio::test]
  async fn test_backoff_defers_next_attempt() {
    let status = NetworkStatus::new(true);
    let queue = queue_with(Arc::new(MemoryStore::new()), &status);
    queue.enqueue(post("/flaky")).unwrap();

    let sender = ScriptedSender::failing(&["/flaky"]);
    queue.drain(&sender).await.unwrap();

    let report = queue.drain(&sender).await.unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(sender.calls().len(), 1);
    assert!(queue.pending().unwrap()[0].next_attempt_at.is_some());
  }

  /// Sender that parks until released, enqueueing a request while parked.
  struct ParkedSender {
    queue: Arc<RequestQueue>,
    entered: Notify,
    release: Notify,
  }

  #[async_trait]
  impl RequestSender for ParkedSender {
    async fn send(&self, request: &QueuedRequest) -> std::result::Result<(), FetchError> {
      if request.url == "/first" {
        self.queue.enqueue(post("/late")).unwrap();
        self.entered.notify_one();
        self.release.notified().await;
      }
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_concurrent_drain_is_coalesced_and_late_entries_survive() {
    let status = NetworkStatus::new(true);
    let queue = Arc::new(queue_with(Arc::new(MemoryStore::new()), &status));
    queue.enqueue(post("/first")).unwrap();

    let sender = Arc::new(ParkedSender {
      queue: Arc::clone(&queue),
      entered: Notify::new(),
      release: Notify::new(),
    });

    let first = {
      let queue = Arc::clone(&queue);
      let sender = Arc::clone(&sender);
      tokio::spawn(async move { queue.drain(sender.as_ref()).await })
    };

    sender.entered.notified().await;
    let second = queue.drain(sender.as_ref()).await.unwrap();
    assert!(second.skipped);

    sender.release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.delivered, 1);

    assert_eq!(urls(&queue.pending().unwrap()), vec!["/late"]);
  }

  #[test]
  fn test_corrupt_queue_reads_as_empty() {
    let store = Arc::new(MemoryStore::new());
    store.set(QUEUE_KEY, "not json").unwrap();
    let queue = queue_with(store, &NetworkStatus::new(true));

    assert!(queue.pending().unwrap().is_empty());
    queue.enqueue(post("/a")).unwrap();
    assert_eq!(queue.len().unwrap(), 1);
  }
}
