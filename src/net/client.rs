//! Queue-aware HTTP client.
//!
//! [`SmartClient::smart_fetch`] never blocks on connectivity: when the probe
//! says offline it answers immediately with a synthetic `202 Accepted` whose
//! body is `{"queued":true}`, optionally storing the request for replay.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::queue::{HttpMethod, NewRequest, RequestQueue};

use super::error::FetchError;
use super::probe::ConnectivityProbe;

const QUEUED_BODY: &[u8] = br#"{"queued":true}"#;

/// A request for [`SmartClient::smart_fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub url: String,
  pub method: HttpMethod,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
  /// Store the request for later replay if it cannot be delivered now
  pub queue_on_fail: bool,
}

impl FetchRequest {
  /// A GET. Not queued on failure: a replayed GET delivers nothing.
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method: HttpMethod::Get,
      headers: BTreeMap::new(),
      body: None,
      queue_on_fail: false,
    }
  }

  /// A POST with a raw body, queued on failure.
  pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method: HttpMethod::Post,
      headers: BTreeMap::new(),
      body: Some(body.into()),
      queue_on_fail: true,
    }
  }

  /// A POST with a JSON body, queued on failure.
  pub fn post_json<B: Serialize + ?Sized>(url: impl Into<String>, body: &B) -> Result<Self, FetchError> {
    Ok(
      Self::post(url, serde_json::to_string(body)?)
        .with_header("content-type", "application/json"),
    )
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn queue_on_fail(mut self, queue_on_fail: bool) -> Self {
    self.queue_on_fail = queue_on_fail;
    self
  }

  fn to_new_request(&self) -> NewRequest {
    NewRequest {
      url: self.url.clone(),
      method: self.method,
      headers: if self.headers.is_empty() {
        None
      } else {
        Some(self.headers.clone())
      },
      body: self.body.clone(),
    }
  }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Vec<u8>,
}

#[derive(Deserialize)]
struct QueuedMarker {
  #[serde(default)]
  queued: bool,
}

impl HttpResponse {
  /// The synthetic "accepted, not yet delivered" response.
  pub fn queued() -> Self {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Self {
      status: StatusCode::ACCEPTED,
      headers,
      body: QUEUED_BODY.to_vec(),
    }
  }

  /// Whether this is a 202 carrying `{"queued":true}`.
  pub fn is_queued(&self) -> bool {
    self.status == StatusCode::ACCEPTED
      && serde_json::from_slice::<QueuedMarker>(&self.body)
        .map(|m| m.queued)
        .unwrap_or(false)
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
    Ok(serde_json::from_slice(&self.body)?)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Result of a JSON request that may have been deferred.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
  /// The upstream answered with a payload
  Ready(T),
  /// The request was accepted locally and not delivered yet
  Queued,
}

impl<T> Delivery<T> {
  pub fn is_queued(&self) -> bool {
    matches!(self, Delivery::Queued)
  }

  pub fn ready(self) -> Option<T> {
    match self {
      Delivery::Ready(value) => Some(value),
      Delivery::Queued => None,
    }
  }
}

/// HTTP client that consults the connectivity probe and falls back to the
/// durable queue.
#[derive(Clone)]
pub struct SmartClient {
  http: reqwest::Client,
  probe: Arc<dyn ConnectivityProbe>,
  queue: Arc<RequestQueue>,
  bearer_token: Option<String>,
}

impl SmartClient {
  pub fn new(
    http: reqwest::Client,
    probe: Arc<dyn ConnectivityProbe>,
    queue: Arc<RequestQueue>,
  ) -> Self {
    Self {
      http,
      probe,
      queue,
      bearer_token: None,
    }
  }

  /// Build the underlying reqwest client with a per-request timeout.
  pub fn build_http(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))
  }

  pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
    self.bearer_token = token;
    self
  }

  pub fn queue(&self) -> &Arc<RequestQueue> {
    &self.queue
  }

  /// Send `request` if online, queue it if asked to and it cannot be sent.
  ///
  /// Offline calls resolve immediately with [`HttpResponse::queued`]. Online
  /// failures are returned to the caller; connectivity-class failures are
  /// queued first when `queue_on_fail` is set. 4xx rejections are never
  /// queued.
  pub async fn smart_fetch(&self, request: FetchRequest) -> Result<HttpResponse, FetchError> {
    if request.queue_on_fail && request.method == HttpMethod::Get {
      tracing::warn!(
        "client: queueing GET {} on failure; replay will not refresh any cache",
        request.url
      );
    }

    if !self.probe.probe().await {
      if request.queue_on_fail {
        self.enqueue(&request)?;
      }
      return Ok(HttpResponse::queued());
    }

    match self
      .deliver(
        request.method,
        &request.url,
        Some(&request.headers),
        request.body.as_deref(),
      )
      .await
    {
      Ok(response) => Ok(response),
      Err(e) => {
        if request.queue_on_fail && e.is_retryable() {
          if let Err(queue_err) = self.enqueue(&request) {
            tracing::warn!("client: could not queue failed request: {}", queue_err);
          }
        }
        Err(e)
      }
    }
  }

  /// Send a request right now, bypassing probe and queue.
  pub async fn deliver(
    &self,
    method: HttpMethod,
    url: &str,
    headers: Option<&BTreeMap<String, String>>,
    body: Option<&str>,
  ) -> Result<HttpResponse, FetchError> {
    let mut builder = self.http.request(method.as_reqwest(), url);

    let mut has_content_type = false;
    for (name, value) in headers.into_iter().flatten() {
      has_content_type |= name.eq_ignore_ascii_case("content-type");
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(token) = &self.bearer_token {
      builder = builder.bearer_auth(token);
    }
    if let Some(body) = body {
      if !has_content_type {
        builder = builder.header(CONTENT_TYPE, "application/json");
      }
      builder = builder.body(body.to_string());
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    if !status.is_success() {
      return Err(FetchError::from_status(
        status,
        String::from_utf8_lossy(&body).into_owned(),
      ));
    }

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }

  /// Run `request` and decode the JSON answer.
  pub async fn request_json<T: DeserializeOwned>(
    &self,
    request: FetchRequest,
  ) -> Result<Delivery<T>, FetchError> {
    let response = self.smart_fetch(request).await?;
    if response.is_queued() {
      return Ok(Delivery::Queued);
    }
    Ok(Delivery::Ready(response.json()?))
  }

  /// GET `url` as JSON. Not queued on failure.
  pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Delivery<T>, FetchError> {
    self.request_json(FetchRequest::get(url)).await
  }

  /// POST `body` as JSON to `url`, queued on failure.
  pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
    &self,
    url: &str,
    body: &B,
  ) -> Result<Delivery<T>, FetchError> {
    self.request_json(FetchRequest::post_json(url, body)?).await
  }

  /// Deliver `requests` in batches of `batch_size`, concurrently within a
  /// batch.
  ///
  /// Cancelling `cancel` stops further batches and abandons the in-flight
  /// one; the call then fails with [`FetchError::Cancelled`] and no partial
  /// results are returned. Batched requests are never queued.
  pub async fn fetch_batch(
    &self,
    requests: Vec<FetchRequest>,
    batch_size: usize,
    cancel: &CancellationToken,
  ) -> Result<Vec<HttpResponse>, FetchError> {
    if cancel.is_cancelled() {
      return Err(FetchError::Cancelled);
    }
    if !self.probe.probe().await {
      return Err(FetchError::Unreachable("offline".to_string()));
    }

    let mut results = Vec::with_capacity(requests.len());
    let mut pending = requests.into_iter().peekable();

    while pending.peek().is_some() {
      if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
      }

      let batch: Vec<FetchRequest> = pending.by_ref().take(batch_size.max(1)).collect();
      let in_flight = futures::future::join_all(batch.iter().map(|r| {
        self.deliver(r.method, &r.url, Some(&r.headers), r.body.as_deref())
      }));

      let responses = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        responses = in_flight => responses,
      };

      for response in responses {
        results.push(response?);
      }
    }

    Ok(results)
  }

  fn enqueue(&self, request: &FetchRequest) -> Result<(), FetchError> {
    self
      .queue
      .enqueue(request.to_new_request())
      .map(|_| ())
      .map_err(|e| FetchError::Storage(e.to_string()))
  }
}
