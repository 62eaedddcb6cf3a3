//! Background refresh of the home-page cache domains.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheDomain, CacheManager, Discriminator, GeoPoint};
use crate::net::FetchError;
use crate::upstream::types::{Alert, MarketPrice, WeatherSnapshot};

/// Upstream services backing the home page.
#[async_trait]
pub trait HomeDataSource: Send + Sync {
  async fn fetch_weather(&self, location: GeoPoint) -> Result<WeatherSnapshot, FetchError>;

  async fn fetch_market_prices(&self) -> Result<Vec<MarketPrice>, FetchError>;

  async fn fetch_alerts(
    &self,
    user_id: Option<&str>,
    location: Option<GeoPoint>,
  ) -> Result<Vec<Alert>, FetchError>;
}

/// Who and where the home page is being shown for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HomeContext {
  pub location: Option<GeoPoint>,
  pub user_id: Option<String>,
}

/// What one preload pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
  /// Another pass was in flight; this one fetched nothing
  pub already_running: bool,
  pub refreshed: Vec<CacheDomain>,
  pub failed: Vec<CacheDomain>,
  /// Still fresh, or not enough context to fetch
  pub skipped: Vec<CacheDomain>,
}

enum Refresh {
  Refreshed,
  Skipped,
  Failed,
}

/// Refreshes stale home domains without blocking the caller's first paint.
///
/// At most one pass runs at a time; overlapping calls return immediately.
pub struct CachePreloader {
  cache: CacheManager,
  source: Arc<dyn HomeDataSource>,
  preloading: AtomicBool,
}

/// Clears the in-flight flag when a pass ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl CachePreloader {
  pub fn new(cache: CacheManager, source: Arc<dyn HomeDataSource>) -> Self {
    Self {
      cache,
      source,
      preloading: AtomicBool::new(false),
    }
  }

  pub fn is_preloading(&self) -> bool {
    self.preloading.load(Ordering::Acquire)
  }

  /// Refresh weather, market prices and alerts where the cache would miss.
  ///
  /// Domains are fetched concurrently and fail independently.
  pub async fn preload_home_data(
    &self,
    location: Option<GeoPoint>,
    user_id: Option<&str>,
  ) -> PreloadReport {
    if self
      .preloading
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      tracing::debug!("preload: already running");
      return PreloadReport {
        already_running: true,
        ..PreloadReport::default()
      };
    }
    let _in_flight = InFlight(&self.preloading);

    let (weather, prices, alerts) = tokio::join!(
      self.refresh_weather(location),
      self.refresh_prices(),
      self.refresh_alerts(user_id, location),
    );

    let mut report = PreloadReport::default();
    for (domain, outcome) in [
      (CacheDomain::HomeWeather, weather),
      (CacheDomain::HomeMarketPrices, prices),
      (CacheDomain::HomeAlerts, alerts),
    ] {
      match outcome {
        Refresh::Refreshed => report.refreshed.push(domain),
        Refresh::Skipped => report.skipped.push(domain),
        Refresh::Failed => report.failed.push(domain),
      }
    }

    tracing::info!(
      "preload: refreshed {:?}, failed {:?}",
      report.refreshed,
      report.failed
    );
    report
  }

  async fn refresh_weather(&self, location: Option<GeoPoint>) -> Refresh {
    let Some(location) = location else {
      return Refresh::Skipped;
    };
    if !self
      .cache
      .needs_refresh(CacheDomain::HomeWeather, &Discriminator::location(location))
    {
      return Refresh::Skipped;
    }

    match self.source.fetch_weather(location).await {
      Ok(weather) => {
        self.cache.save_home_weather(&weather, location);
        Refresh::Refreshed
      }
      Err(e) => {
        tracing::warn!("preload: weather refresh failed: {}", e);
        Refresh::Failed
      }
    }
  }

  async fn refresh_prices(&self) -> Refresh {
    if !self
      .cache
      .needs_refresh(CacheDomain::HomeMarketPrices, &Discriminator::Global)
    {
      return Refresh::Skipped;
    }

    match self.source.fetch_market_prices().await {
      Ok(prices) => {
        self.cache.save_home_prices(&prices);
        Refresh::Refreshed
      }
      Err(e) => {
        tracing::warn!("preload: market price refresh failed: {}", e);
        Refresh::Failed
      }
    }
  }

  async fn refresh_alerts(&self, user_id: Option<&str>, location: Option<GeoPoint>) -> Refresh {
    if user_id.is_none() && location.is_none() {
      return Refresh::Skipped;
    }
    if !self.cache.needs_refresh(
      CacheDomain::HomeAlerts,
      &Discriminator::audience(user_id, location),
    ) {
      return Refresh::Skipped;
    }

    match self.source.fetch_alerts(user_id, location).await {
      Ok(alerts) => {
        self.cache.save_home_alerts(&alerts, user_id, location);
        Refresh::Refreshed
      }
      Err(e) => {
        tracing::warn!("preload: alert refresh failed: {}", e);
        Refresh::Failed
      }
    }
  }

  /// Re-run [`preload_home_data`](Self::preload_home_data) whenever
  /// `foreground` is updated and reads `true`. A value the receiver has
  /// already seen does not trigger a run.
  pub fn spawn_visibility_preloader(
    self: &Arc<Self>,
    mut foreground: watch::Receiver<bool>,
    context: HomeContext,
  ) -> PreloaderHandle {
    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    let preloader = Arc::clone(self);

    let task = tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = stop.cancelled() => break,
          changed = foreground.changed() => {
            if changed.is_err() {
              break;
            }
            // A hide/show pair sent between wakeups arrives as one change.
            if *foreground.borrow_and_update() {
              tracing::debug!("preload: app returned to foreground");
              preloader
                .preload_home_data(context.location, context.user_id.as_deref())
                .await;
            }
          }
        }
      }
    });

    PreloaderHandle { shutdown, task }
  }
}

/// Handle to a visibility preloader task.
pub struct PreloaderHandle {
  shutdown: CancellationToken,
  task: JoinHandle<()>,
}

impl PreloaderHandle {
  pub async fn stop(self) {
    self.shutdown.cancel();
    if let Err(e) = self.task.await {
      tracing::warn!("preload: task ended abnormally: {}", e);
    }
  }
}
