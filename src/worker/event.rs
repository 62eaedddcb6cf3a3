use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Reasons for the worker to attempt a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
  /// Periodic poll tick (the first one fires at startup)
  Poll,
  /// The platform reported an offline to online transition
  Reconnected,
}

/// Event handler that produces events from the online flag and a poll timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl EventHandler {
  /// Create a new event handler polling every `poll_interval`
  pub fn new(
    poll_interval: Duration,
    mut online: watch::Receiver<bool>,
    shutdown: CancellationToken,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(poll_interval);
      // A machine waking from sleep gets one tick, not a burst
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

      let mut watching = true;

      loop {
        let event = tokio::select! {
          _ = shutdown.cancelled() => break,
          _ = ticker.tick() => WorkerEvent::Poll,
          changed = online.changed(), if watching => {
            if changed.is_err() {
              // Status owner is gone; keep polling only
              watching = false;
              continue;
            }
            // An offline/online pair sent between wakeups arrives as one change
            if !*online.borrow_and_update() {
              continue;
            }
            WorkerEvent::Reconnected
          }
        };

        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<WorkerEvent> {
    self.rx.recv().await
  }

  /// Drop events that piled up while a drain was running.
  pub fn discard_pending(&mut self) -> usize {
    let mut discarded = 0;
    while self.rx.try_recv().is_ok() {
      discarded += 1;
    }
    discarded
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_reconnect_produces_event() {
    let (tx, rx) = watch::channel(false);
    let shutdown = CancellationToken::new();
    let mut events = EventHandler::new(Duration::from_secs(3600), rx, shutdown.clone());

    assert_eq!(events.next().await, Some(WorkerEvent::Poll));

    tx.send(true).unwrap();
    assert_eq!(events.next().await, Some(WorkerEvent::Reconnected));

    shutdown.cancel();
    assert_eq!(events.next().await, None);
  }

  #[tokio::test]
  async fn test_going_offline_is_not_an_event() {
    let (tx, rx) = watch::channel(true);
    let shutdown = CancellationToken::new();
    let mut events = EventHandler::new(Duration::from_secs(3600), rx, shutdown.clone());
    assert_eq!(events.next().await, Some(WorkerEvent::Poll));

    tx.send(false).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(events.discard_pending(), 0);

    tx.send(true).unwrap();
    assert_eq!(events.next().await, Some(WorkerEvent::Reconnected));
    shutdown.cancel();
  }

  #[tokio::test]
  async fn test_brief_outage_still_produces_event() {
    let (tx, rx) = watch::channel(true);
    let shutdown = CancellationToken::new();
    let mut events = EventHandler::new(Duration::from_secs(3600), rx, shutdown.clone());
    assert_eq!(events.next().await, Some(WorkerEvent::Poll));

    tx.send(false).unwrap();
    tx.send(true).unwrap();
    assert_eq!(events.next().await, Some(WorkerEvent::Reconnected));

    shutdown.cancel();
    assert_eq!(events.next().await, None);
  }
}
