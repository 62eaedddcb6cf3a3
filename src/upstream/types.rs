use serde::{Deserialize, Serialize};

use crate::cache::GeoPoint;

/// One mandi price quote for a commodity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPrice {
  pub commodity: String,
  pub market: String,
  #[serde(default)]
  pub state: Option<String>,
  #[serde(default)]
  pub district: Option<String>,
  pub min_price: f64,
  pub max_price: f64,
  pub modal_price: f64,
  #[serde(default)]
  pub arrival_date: Option<String>,
}

/// Current conditions shown on the home page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
  #[serde(default)]
  pub location_name: Option<String>,
  pub temperature_c: f64,
  #[serde(default)]
  pub humidity: Option<f64>,
  pub condition: String,
  #[serde(default)]
  pub wind_kph: Option<f64>,
  #[serde(default)]
  pub rain_chance: Option<f64>,
  #[serde(default)]
  pub observed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
  #[default]
  Info,
  Warning,
  Critical,
}

/// Advisory alert (pest outbreak, heavy rain, price swing)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
  pub id: String,
  pub title: String,
  pub message: String,
  #[serde(default)]
  pub severity: AlertSeverity,
  #[serde(default)]
  pub issued_at: Option<String>,
}

/// A farm plot registered by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmRecord {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub crop: Option<String>,
  #[serde(default)]
  pub area_acres: Option<f64>,
  #[serde(default)]
  pub location: Option<GeoPoint>,
}

/// A unit of farmer-facing advice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTask {
  pub id: String,
  pub title: String,
  /// Human label such as "30 min"
  pub estimated_time: String,
  #[serde(default)]
  pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceTrend {
  Up,
  Down,
  Unchanged,
  /// No earlier price was recorded
  New,
}

/// Movement of a commodity's modal price since it was last seen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceDelta {
  pub previous: Option<f64>,
  pub current: f64,
  pub trend: PriceTrend,
}

impl PriceDelta {
  pub fn between(previous: Option<f64>, current: f64) -> Self {
    let trend = match previous {
      None => PriceTrend::New,
      Some(p) if current > p => PriceTrend::Up,
      Some(p) if current < p => PriceTrend::Down,
      Some(_) => PriceTrend::Unchanged,
    };
    Self {
      previous,
      current,
      trend,
    }
  }

  pub fn change(&self) -> Option<f64> {
    self.previous.map(|p| self.current - p)
  }
}
