//! Classification of request failures.

use reqwest::StatusCode;

/// Error returned by [`SmartClient`](super::SmartClient) and queue senders.
///
/// Connectivity-class failures are worth retrying later; application-level
/// rejections are not.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  /// The host could not be reached (DNS, connect, reset).
  #[error("upstream unreachable: {0}")]
  Unreachable(String),

  /// The request did not complete within the configured timeout.
  #[error("request timed out: {0}")]
  Timeout(String),

  /// Upstream answered with a 5xx status.
  #[error("upstream error {status}")]
  Server { status: StatusCode },

  /// Upstream answered with a 4xx status.
  #[error("request rejected with {status}: {body}")]
  Rejected { status: StatusCode, body: String },

  /// The operation was cancelled by the caller.
  #[error("request cancelled")]
  Cancelled,

  /// The response body did not match the expected shape.
  #[error("failed to decode response: {0}")]
  Decode(#[from] serde_json::Error),

  /// The request could not be built (bad URL, bad header).
  #[error("invalid request: {0}")]
  Invalid(String),

  /// The durable queue could not be read or written.
  #[error("queue storage failed: {0}")]
  Storage(String),
}

impl FetchError {
  /// Whether a later replay of the same request could succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      FetchError::Unreachable(_) | FetchError::Timeout(_) | FetchError::Server { .. }
    )
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, FetchError::Cancelled)
  }

  /// Classify a non-success status code.
  pub fn from_status(status: StatusCode, body: String) -> Self {
    if status.is_server_error() {
      FetchError::Server { status }
    } else {
      FetchError::Rejected { status, body }
    }
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      FetchError::Timeout(e.to_string())
    } else if e.is_builder() {
      FetchError::Invalid(e.to_string())
    } else if let Some(status) = e.status() {
      FetchError::from_status(status, String::new())
    } else if e.is_decode() {
      FetchError::Unreachable(format!("body read failed: {}", e))
    } else {
      FetchError::Unreachable(e.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retryable_classification() {
    assert!(FetchError::Unreachable("refused".into()).is_retryable());
    assert!(FetchError::Timeout("10s".into()).is_retryable());
    assert!(FetchError::from_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());

    let rejected = FetchError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "bad crop".into());
    assert!(!rejected.is_retryable());
    assert!(matches!(rejected, FetchError::Rejected { .. }));

    assert!(!FetchError::Cancelled.is_retryable());
    assert!(FetchError::Cancelled.is_cancelled());
  }
}
