//! Connectivity probe.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use super::status::NetworkStatus;

/// Answers "is it worth attempting a network call right now?".
///
/// Probing never mutates shared state, so callers may probe as often as they
/// like.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
  async fn probe(&self) -> bool;
}

/// Optional active reachability check.
#[derive(Clone, Debug)]
struct HealthCheck {
  client: reqwest::Client,
  url: Url,
  timeout: Duration,
}

/// Probe combining the platform online flag with an optional HEAD ping.
#[derive(Clone, Debug)]
pub struct Connectivity {
  status: NetworkStatus,
  /// Minimum time a probe takes, damping rapid online/offline flapping
  min_latency: Duration,
  health: Option<HealthCheck>,
}

impl Connectivity {
  pub fn new(status: NetworkStatus) -> Self {
    Self {
      status,
      min_latency: Duration::from_millis(100),
      health: None,
    }
  }

  pub fn with_min_latency(mut self, min_latency: Duration) -> Self {
    self.min_latency = min_latency;
    self
  }

  /// Also require a HEAD request to `url` to get any HTTP answer.
  pub fn with_health_check(mut self, client: reqwest::Client, url: Url, timeout: Duration) -> Self {
    self.health = Some(HealthCheck {
      client,
      url,
      timeout,
    });
    self
  }

  pub fn status(&self) -> &NetworkStatus {
    &self.status
  }
}

#[async_trait]
impl ConnectivityProbe for Connectivity {
  async fn probe(&self) -> bool {
    if !self.min_latency.is_zero() {
      tokio::time::sleep(self.min_latency).await;
    }

    if !self.status.is_online() {
      return false;
    }

    let Some(health) = &self.health else {
      return true;
    };

    match health
      .client
      .head(health.url.clone())
      .timeout(health.timeout)
      .send()
      .await
    {
      Ok(_) => true,
      Err(e) => {
        tracing::debug!("probe: health check against {} failed: {}", health.url, e);
        false
      }
    }
  }
}
