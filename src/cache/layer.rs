//! Read-through fetching on top of the domain cache.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;

use crate::net::FetchError;

use super::domain::{CacheDomain, Discriminator};
use super::manager::CacheManager;
use super::traits::CacheResult;

impl CacheManager {
  /// Fetch with cache-first strategy.
  ///
  /// 1. Valid entry for `discriminator` within its TTL - return it
  /// 2. Otherwise fetch from upstream and save the result
  /// 3. On a connectivity failure, serve the expired entry if one matches
  ///
  /// Rejections and cancellations are always returned to the caller.
  pub async fn read_through<T, F, Fut>(
    &self,
    domain: CacheDomain,
    scope: Option<&str>,
    discriminator: Discriminator,
    fetcher: F,
  ) -> Result<CacheResult<T>, FetchError>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
  {
    let cached = self
      .peek_entry::<T>(domain, scope)
      .filter(|entry| entry.discriminator.matches(&discriminator));

    if let Some(cached) = cached {
      if !domain.is_expired_at(cached.timestamp, Utc::now()) {
        // Cache is fresh, return immediately
        return Ok(CacheResult::from_cache(cached.payload, cached.timestamp));
      }

      // Cache is stale, try to fetch from network
      match fetcher().await {
        Ok(data) => {
          self.save_entry(domain, scope, &data, discriminator);
          Ok(CacheResult::from_network(data))
        }
        Err(e) if e.is_retryable() => {
          tracing::info!("cache: serving stale {} ({})", domain, e);
          Ok(CacheResult::offline(cached.payload, cached.timestamp))
        }
        Err(e) => Err(e),
      }
    } else {
      // No usable cache, must fetch from network
      let data = fetcher().await?;
      self.save_entry(domain, scope, &data, discriminator);
      Ok(CacheResult::from_network(data))
    }
  }
}
