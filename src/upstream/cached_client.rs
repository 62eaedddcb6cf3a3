//! Upstream client with transparent read-through caching.

use crate::cache::{CacheDomain, CacheManager, CacheResult, CacheSource, Discriminator};
use crate::net::FetchError;

use super::client::UpstreamClient;
use super::types::{FarmRecord, MarketPrice};

/// Upstream client with transparent caching support.
///
/// This wraps the underlying UpstreamClient and provides the same reads,
/// but serves valid cache entries first and falls back to stale ones when
/// the backend cannot be reached.
#[derive(Clone)]
pub struct CachedUpstream {
  inner: UpstreamClient,
  cache: CacheManager,
}

impl CachedUpstream {
  pub fn new(inner: UpstreamClient, cache: CacheManager) -> Self {
    Self { inner, cache }
  }

  /// Farms for a user with caching.
  pub async fn farms(&self, user_mobile: &str) -> Result<CacheResult<Vec<FarmRecord>>, FetchError> {
    self
      .cache
      .read_through(
        CacheDomain::FarmRecords,
        None,
        Discriminator::user(user_mobile),
        || {
          let inner = self.inner.clone();
          let user_mobile = user_mobile.to_string();
          async move { inner.fetch_farms(&user_mobile).await }
        },
      )
      .await
  }

  /// Price snapshot for a commodity selection with caching.
  ///
  /// Fresh network data also rolls the previous-price map forward.
  pub async fn prices(
    &self,
    commodities: &[String],
  ) -> Result<CacheResult<Vec<MarketPrice>>, FetchError> {
    let result = self
      .cache
      .read_through(
        CacheDomain::PriceSnapshot,
        None,
        Discriminator::commodities(commodities),
        || {
          let inner = self.inner.clone();
          let commodities = commodities.to_vec();
          async move { inner.fetch_prices(&commodities).await }
        },
      )
      .await?;

    if result.source == CacheSource::Network {
      self.cache.record_price_changes(&result.data);
    }

    Ok(result)
  }
}
