//! Cache domains, their expiry policy and validity discriminators.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum drift, in degrees of latitude or longitude, for a location-bound
/// entry to stay valid.
pub const LOCATION_TOLERANCE_DEG: f64 = 0.1;

/// One independent category of cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDomain {
  SelectedCrops,
  PriceSnapshot,
  PreviousPrices,
  Workflow,
  HomeWeather,
  HomeMarketPrices,
  HomeAlerts,
  FarmRecords,
}

impl CacheDomain {
  pub const ALL: [CacheDomain; 8] = [
    CacheDomain::SelectedCrops,
    CacheDomain::PriceSnapshot,
    CacheDomain::PreviousPrices,
    CacheDomain::Workflow,
    CacheDomain::HomeWeather,
    CacheDomain::HomeMarketPrices,
    CacheDomain::HomeAlerts,
    CacheDomain::FarmRecords,
  ];

  /// Domains refreshed by the home-page preloader.
  pub const HOME: [CacheDomain; 3] = [
    CacheDomain::HomeWeather,
    CacheDomain::HomeMarketPrices,
    CacheDomain::HomeAlerts,
  ];

  pub fn name(self) -> &'static str {
    match self {
      CacheDomain::SelectedCrops => "selected_crops",
      CacheDomain::PriceSnapshot => "price_snapshot",
      CacheDomain::PreviousPrices => "previous_prices",
      CacheDomain::Workflow => "workflow",
      CacheDomain::HomeWeather => "home_weather",
      CacheDomain::HomeMarketPrices => "home_market_prices",
      CacheDomain::HomeAlerts => "home_alerts",
      CacheDomain::FarmRecords => "farm_records",
    }
  }

  /// Maximum entry age. `None` never expires.
  pub fn ttl(self) -> Option<Duration> {
    match self {
      CacheDomain::SelectedCrops | CacheDomain::PreviousPrices | CacheDomain::Workflow => None,
      CacheDomain::PriceSnapshot => Some(Duration::minutes(10)),
      CacheDomain::HomeWeather | CacheDomain::HomeMarketPrices | CacheDomain::HomeAlerts => {
        Some(Duration::minutes(30))
      }
      CacheDomain::FarmRecords => Some(Duration::minutes(5)),
    }
  }

  /// Whether the domain keeps one entry per scope (plot) instead of one
  /// entry overall.
  pub fn is_scoped(self) -> bool {
    matches!(self, CacheDomain::Workflow)
  }

  /// Whether an entry written at `timestamp` is past its TTL at `now`.
  pub fn is_expired_at(self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match self.ttl() {
      Some(ttl) => now - timestamp > ttl,
      None => false,
    }
  }
}

impl fmt::Display for CacheDomain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for CacheDomain {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim().to_lowercase().replace('-', "_");
    CacheDomain::ALL
      .into_iter()
      .find(|d| d.name() == wanted)
      .ok_or_else(|| format!("unknown cache domain {}", s))
  }
}

/// Build the storage key for `domain`.
///
/// Scoped domains append the scope (`workflow:<plot_id>`); without a scope
/// the result is the prefix shared by all of the domain's entries.
pub fn build_cache_key(domain: CacheDomain, scope: Option<&str>) -> String {
  match scope {
    Some(scope) if domain.is_scoped() => format!("{}:{}", domain.name(), scope),
    _ if domain.is_scoped() => format!("{}:", domain.name()),
    _ => domain.name().to_string(),
  }
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
  pub lat: f64,
  pub lon: f64,
}

impl GeoPoint {
  pub fn new(lat: f64, lon: f64) -> Self {
    Self { lat, lon }
  }

  /// Within [`LOCATION_TOLERANCE_DEG`] on both axes.
  pub fn is_near(&self, other: &GeoPoint) -> bool {
    (self.lat - other.lat).abs() <= LOCATION_TOLERANCE_DEG
      && (self.lon - other.lon).abs() <= LOCATION_TOLERANCE_DEG
  }
}

/// Query context that must match between a cache write and a cache read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discriminator {
  /// Valid for every reader
  #[default]
  Global,
  /// Sorted, de-duplicated commodity names
  Commodities { names: Vec<String> },
  Location { point: GeoPoint },
  /// Workflow plot, optionally tied to one advisory chat session
  Session {
    plot_id: String,
    session_id: Option<String>,
  },
  User { user_id: String },
  /// Alerts: by user when both sides know the user, else by location
  Audience {
    user_id: Option<String>,
    location: Option<GeoPoint>,
  },
}

impl Discriminator {
  pub fn commodities<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut names: Vec<String> = names
      .into_iter()
      .map(|n| n.as_ref().trim().to_string())
      .filter(|n| !n.is_empty())
      .collect();
    names.sort();
    names.dedup();
    Discriminator::Commodities { names }
  }

  pub fn location(point: GeoPoint) -> Self {
    Discriminator::Location { point }
  }

  pub fn session(plot_id: &str, session_id: Option<&str>) -> Self {
    Discriminator::Session {
      plot_id: plot_id.to_string(),
      session_id: session_id.map(String::from),
    }
  }

  pub fn user(user_id: &str) -> Self {
    Discriminator::User {
      user_id: user_id.to_string(),
    }
  }

  pub fn audience(user_id: Option<&str>, location: Option<GeoPoint>) -> Self {
    Discriminator::Audience {
      user_id: user_id.map(String::from),
      location,
    }
  }

  /// Whether an entry stored with `self` is valid for a reader asking with
  /// `current`.
  pub fn matches(&self, current: &Discriminator) -> bool {
    use Discriminator::*;

    match (self, current) {
      (Global, Global) => true,
      (Commodities { names: stored }, Commodities { names: wanted }) => stored == wanted,
      (Location { point: stored }, Location { point: wanted }) => stored.is_near(wanted),
      (
        Session {
          plot_id: stored_plot,
          session_id: stored_session,
        },
        Session {
          plot_id: wanted_plot,
          session_id: wanted_session,
        },
      ) => {
        // A reader without a session accepts any session for the plot
        stored_plot == wanted_plot && (wanted_session.is_none() || stored_session == wanted_session)
      }
      (User { user_id: stored }, User { user_id: wanted }) => stored == wanted,
      (
        Audience {
          user_id: stored_user,
          location: stored_loc,
        },
        Audience {
          user_id: wanted_user,
          location: wanted_loc,
        },
      ) => match (stored_user, wanted_user) {
        (Some(stored), Some(wanted)) => stored == wanted,
        _ => match (stored_loc, wanted_loc) {
          (Some(stored), Some(wanted)) => stored.is_near(wanted),
          (None, None) => stored_user.is_none() && wanted_user.is_none(),
          _ => false,
        },
      },
      _ => false,
    }
  }
}

/// Stored form of every cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope<T> {
  pub payload: T,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub discriminator: Discriminator,
}

/// Envelope fields readable without knowing the payload type.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EnvelopeMeta {
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub discriminator: Discriminator,
}
