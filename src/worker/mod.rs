//! Background replay of the durable request queue.

pub mod event;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::net::NetworkStatus;
use crate::queue::{RequestQueue, RequestSender};

use event::{EventHandler, WorkerEvent};

/// Drains the queue on every poll tick and every reconnect.
pub struct QueueWorker {
  queue: Arc<RequestQueue>,
  sender: Arc<dyn RequestSender>,
  status: NetworkStatus,
  poll_interval: Duration,
}

impl QueueWorker {
  pub fn new(
    queue: Arc<RequestQueue>,
    sender: Arc<dyn RequestSender>,
    status: NetworkStatus,
  ) -> Self {
    Self {
      queue,
      sender,
      status,
      poll_interval: Duration::from_secs(5),
    }
  }

  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  /// Spawn the worker loop. It runs until [`WorkerHandle::stop`].
  pub fn start(self) -> WorkerHandle {
    let shutdown = CancellationToken::new();
    let mut events = EventHandler::new(
      self.poll_interval,
      self.status.subscribe(),
      shutdown.clone(),
    );

    tracing::info!(
      "worker: started, polling every {:?}",
      self.poll_interval
    );

    let task = tokio::spawn(async move {
      while let Some(event) = events.next().await {
        if event == WorkerEvent::Reconnected {
          tracing::info!("worker: reconnected, replaying queued requests");
        }

        match self.queue.drain(self.sender.as_ref()).await {
          Ok(report) if report.attempted() > 0 => {
            tracing::debug!("worker: {:?}", report);
          }
          Ok(_) => {}
          Err(e) => tracing::warn!("worker: drain failed: {}", e),
        }

        // Triggers that arrived during the drain are covered by it
        events.discard_pending();
      }
      tracing::info!("worker: stopped");
    });

    WorkerHandle { shutdown, task }
  }
}

/// Handle to a running [`QueueWorker`].
pub struct WorkerHandle {
  shutdown: CancellationToken,
  task: JoinHandle<()>,
}

impl WorkerHandle {
  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }

  /// Stop the worker, letting an in-flight drain finish.
  pub async fn stop(self) {
    self.shutdown.cancel();
    if let Err(e) = self.task.await {
      tracing::warn!("worker: task ended abnormally: {}", e);
    }
  }
}
