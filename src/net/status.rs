//! Platform-reported network presence.

use tokio::sync::watch;

/// Online flag shared by the probe, the client and the queue worker.
///
/// The host application flips it from whatever signal the platform provides.
/// Subscribers see every change, which is how the worker learns about
/// reconnects.
#[derive(Clone, Debug)]
pub struct NetworkStatus {
  tx: watch::Sender<bool>,
}

impl NetworkStatus {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Update the flag. Subscribers are only notified on an actual change.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      if online {
        tracing::info!("network: back online");
      } else {
        tracing::warn!("network: offline, mutating requests will be queued");
      }
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for NetworkStatus {
  fn default() -> Self {
    Self::new(true)
  }
}
