use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::cache::GeoPoint;
use crate::config::ApiConfig;
use crate::net::{Delivery, FetchError, SmartClient};
use crate::preload::HomeDataSource;

use super::types::{Alert, FarmRecord, MarketPrice, WeatherSnapshot};

/// Advisory API client
#[derive(Clone)]
pub struct UpstreamClient {
  client: SmartClient,
  api: ApiConfig,
}

impl UpstreamClient {
  pub fn new(client: SmartClient, api: ApiConfig) -> Self {
    Self { client, api }
  }

  /// Farms registered to a user
  pub async fn fetch_farms(&self, user_mobile: &str) -> Result<Vec<FarmRecord>, FetchError> {
    let url = self.url(&self.api.farms_path, &[("mobile", user_mobile.to_string())])?;
    self.get(&url).await
  }

  /// Latest quotes for the given commodities
  pub async fn fetch_prices(&self, commodities: &[String]) -> Result<Vec<MarketPrice>, FetchError> {
    let query: Vec<(&str, String)> = commodities
      .iter()
      .map(|name| ("commodity", name.clone()))
      .collect();
    let url = self.url(&self.api.prices_path, &query)?;
    self.get(&url).await
  }

  fn url(&self, path: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
    let mut url = self
      .api
      .endpoint(path)
      .map_err(|e| FetchError::Invalid(e.to_string()))?;
    if !query.is_empty() {
      url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url.into())
  }

  /// Reads are never queued; an offline read surfaces as unreachable.
  async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
    match self.client.get_json(url).await? {
      Delivery::Ready(data) => Ok(data),
      Delivery::Queued => Err(FetchError::Unreachable("offline".to_string())),
    }
  }
}

#[async_trait]
impl HomeDataSource for UpstreamClient {
  async fn fetch_weather(&self, location: GeoPoint) -> Result<WeatherSnapshot, FetchError> {
    let url = self.url(
      &self.api.weather_path,
      &[
        ("lat", location.lat.to_string()),
        ("lon", location.lon.to_string()),
      ],
    )?;
    self.get(&url).await
  }

  async fn fetch_market_prices(&self) -> Result<Vec<MarketPrice>, FetchError> {
    let url = self.url(&self.api.market_prices_path, &[])?;
    self.get(&url).await
  }

  async fn fetch_alerts(
    &self,
    user_id: Option<&str>,
    location: Option<GeoPoint>,
  ) -> Result<Vec<Alert>, FetchError> {
    let mut query = Vec::new();
    if let Some(user_id) = user_id {
      query.push(("user_id", user_id.to_string()));
    }
    if let Some(location) = location {
      query.push(("lat", location.lat.to_string()));
      query.push(("lon", location.lon.to_string()));
    }
    let url = self.url(&self.api.alerts_path, &query)?;
    self.get(&url).await
  }
}
