//! Senders used to replay queued requests.

use async_trait::async_trait;

use crate::net::{FetchError, SmartClient};

use super::request::QueuedRequest;

/// Delivers one queued request.
///
/// Returning an error keeps the entry queued when the error is retryable and
/// dead-letters it otherwise. Return `Ok` for anything that should be
/// dropped from the queue.
#[async_trait]
pub trait RequestSender: Send + Sync {
  async fn send(&self, request: &QueuedRequest) -> Result<(), FetchError>;
}

/// Replays requests over HTTP.
#[derive(Clone)]
pub struct HttpSender {
  client: SmartClient,
}

impl HttpSender {
  pub fn new(client: SmartClient) -> Self {
    Self { client }
  }
}

#[async_trait]
impl RequestSender for HttpSender {
  async fn send(&self, request: &QueuedRequest) -> Result<(), FetchError> {
    let response = self
      .client
      .deliver(
        request.method,
        &request.url,
        request.headers.as_ref(),
        request.body.as_deref(),
      )
      .await?;

    tracing::debug!(
      "queue: replayed {} {} -> {}",
      request.method,
      request.url,
      response.status
    );
    Ok(())
  }
}
