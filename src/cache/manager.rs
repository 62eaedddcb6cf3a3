//! Domain cache manager.
//!
//! Every domain stores one [`CacheEnvelope`] per key. Reads validate the
//! envelope against the domain TTL and the reader's [`Discriminator`]:
//! unreadable or expired entries are purged, mismatching ones are left for
//! the next write to replace. Storage failures never reach the caller; they
//! are logged and reported as a cache miss.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::store::KvStore;
use crate::upstream::types::{Alert, FarmRecord, MarketPrice, PriceDelta, WeatherSnapshot, WorkflowTask};

use super::domain::{build_cache_key, CacheDomain, CacheEnvelope, Discriminator, EnvelopeMeta, GeoPoint};

/// Introspection for one domain, used for "cached Nm ago" labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInfo {
  pub domain: CacheDomain,
  pub present: bool,
  pub cached_at: Option<DateTime<Utc>>,
  pub age_minutes: Option<i64>,
  pub expired: bool,
}

/// Snapshot of every domain's cache state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
  pub domains: Vec<DomainInfo>,
}

impl CacheInfo {
  pub fn get(&self, domain: CacheDomain) -> Option<&DomainInfo> {
    self.domains.iter().find(|d| d.domain == domain)
  }
}

/// Keyed, TTL-bound snapshots over the app's data domains.
#[derive(Clone)]
pub struct CacheManager {
  store: Arc<dyn KvStore>,
  /// Serializes read-modify-write cycles; shared by clones
  edit_lock: Arc<Mutex<()>>,
}

impl CacheManager {
  pub fn new(store: Arc<dyn KvStore>) -> Self {
    Self {
      store,
      edit_lock: Arc::new(Mutex::new(())),
    }
  }

  /// The lock guards no data, so a poisoned lock is still usable.
  fn lock_edits(&self) -> MutexGuard<'_, ()> {
    self.edit_lock.lock().unwrap_or_else(PoisonError::into_inner)
  }

  // ==========================================================================
  // Selected crops (user preference, never expires)
  // ==========================================================================

  pub fn save_selected_crops(&self, crops: &[String]) {
    self.save_entry(CacheDomain::SelectedCrops, None, &crops, Discriminator::Global);
  }

  pub fn load_selected_crops(&self) -> Option<Vec<String>> {
    self
      .load_entry(CacheDomain::SelectedCrops, None, &Discriminator::Global)
      .map(|e| e.payload)
  }

  // ==========================================================================
  // Price snapshot (10 min, keyed by commodity set)
  // ==========================================================================

  pub fn save_price_data(&self, prices: &[MarketPrice], commodities: &[String]) {
    self.save_entry(
      CacheDomain::PriceSnapshot,
      None,
      &prices,
      Discriminator::commodities(commodities),
    );
  }

  pub fn load_price_data(&self, commodities: &[String]) -> Option<Vec<MarketPrice>> {
    self
      .load_entry(
        CacheDomain::PriceSnapshot,
        None,
        &Discriminator::commodities(commodities),
      )
      .map(|e| e.payload)
  }

  // ==========================================================================
  // Previous prices (running state, never expires)
  // ==========================================================================

  pub fn save_previous_prices(&self, prices: &BTreeMap<String, f64>) {
    self.save_entry(CacheDomain::PreviousPrices, None, prices, Discriminator::Global);
  }

  pub fn load_previous_prices(&self) -> Option<BTreeMap<String, f64>> {
    self
      .load_entry(CacheDomain::PreviousPrices, None, &Discriminator::Global)
      .map(|e| e.payload)
  }

  /// Compare `prices` against the last recorded modal price of each
  /// commodity, then record the new prices.
  pub fn record_price_changes(&self, prices: &[MarketPrice]) -> BTreeMap<String, PriceDelta> {
    let _edit = self.lock_edits();
    let mut recorded = self.load_previous_prices().unwrap_or_default();
    let mut deltas = BTreeMap::new();

    for price in prices {
      let previous = recorded.get(&price.commodity).copied();
      deltas.insert(
        price.commodity.clone(),
        PriceDelta::between(previous, price.modal_price),
      );
    }
    for price in prices {
      recorded.insert(price.commodity.clone(), price.modal_price);
    }

    self.save_previous_prices(&recorded);
    deltas
  }

  // ==========================================================================
  // Workflow tasks (local-first store, freshness tracked but not enforced)
  // ==========================================================================

  pub fn save_workflow(&self, plot_id: &str, session_id: Option<&str>, tasks: &[WorkflowTask]) {
    self.save_entry(
      CacheDomain::Workflow,
      Some(plot_id),
      &tasks,
      Discriminator::session(plot_id, session_id),
    );
  }

  pub fn load_workflow(&self, plot_id: &str, session_id: Option<&str>) -> Option<Vec<WorkflowTask>> {
    self
      .load_entry(
        CacheDomain::Workflow,
        Some(plot_id),
        &Discriminator::session(plot_id, session_id),
      )
      .map(|e| e.payload)
  }

  /// Set a task's completion flag and persist immediately. Returns the
  /// updated task, or `None` if the plot or task is not cached.
  pub fn set_task_completed(
    &self,
    plot_id: &str,
    task_id: &str,
    completed: bool,
  ) -> Option<WorkflowTask> {
    let _edit = self.lock_edits();
    let mut entry = self.peek_entry::<Vec<WorkflowTask>>(CacheDomain::Workflow, Some(plot_id))?;
    let task = entry.payload.iter_mut().find(|t| t.id == task_id)?;
    task.completed = completed;
    let updated = task.clone();

    self.save_entry(
      CacheDomain::Workflow,
      Some(plot_id),
      &entry.payload,
      entry.discriminator,
    );
    Some(updated)
  }

  /// Remove a task and persist immediately. Returns whether it existed.
  pub fn delete_task(&self, plot_id: &str, task_id: &str) -> bool {
    let _edit = self.lock_edits();
    let Some(mut entry) = self.peek_entry::<Vec<WorkflowTask>>(CacheDomain::Workflow, Some(plot_id))
    else {
      return false;
    };

    let before = entry.payload.len();
    entry.payload.retain(|t| t.id != task_id);
    if entry.payload.len() == before {
      return false;
    }

    self.save_entry(
      CacheDomain::Workflow,
      Some(plot_id),
      &entry.payload,
      entry.discriminator,
    );
    true
  }

  pub fn clear_workflow(&self, plot_id: &str) {
    self.remove_key(&build_cache_key(CacheDomain::Workflow, Some(plot_id)));
  }

  // ==========================================================================
  // Home page (30 min)
  // ==========================================================================

  pub fn save_home_weather(&self, weather: &WeatherSnapshot, location: GeoPoint) {
    self.save_entry(
      CacheDomain::HomeWeather,
      None,
      weather,
      Discriminator::location(location),
    );
  }

  pub fn load_home_weather(&self, location: GeoPoint) -> Option<WeatherSnapshot> {
    self
      .load_entry(
        CacheDomain::HomeWeather,
        None,
        &Discriminator::location(location),
      )
      .map(|e| e.payload)
  }

  pub fn save_home_prices(&self, prices: &[MarketPrice]) {
    self.save_entry(CacheDomain::HomeMarketPrices, None, &prices, Discriminator::Global);
  }

  pub fn load_home_prices(&self) -> Option<Vec<MarketPrice>> {
    self
      .load_entry(CacheDomain::HomeMarketPrices, None, &Discriminator::Global)
      .map(|e| e.payload)
  }

  pub fn save_home_alerts(&self, alerts: &[Alert], user_id: Option<&str>, location: Option<GeoPoint>) {
    self.save_entry(
      CacheDomain::HomeAlerts,
      None,
      &alerts,
      Discriminator::audience(user_id, location),
    );
  }

  pub fn load_home_alerts(&self, user_id: Option<&str>, location: Option<GeoPoint>) -> Option<Vec<Alert>> {
    self
      .load_entry(
        CacheDomain::HomeAlerts,
        None,
        &Discriminator::audience(user_id, location),
      )
      .map(|e| e.payload)
  }

  /// Drop weather, market prices and alerts.
  pub fn clear_home_cache(&self) {
    for domain in CacheDomain::HOME {
      self.clear_domain(domain);
    }
  }

  // ==========================================================================
  // Farm records (5 min, keyed by user mobile)
  // ==========================================================================

  pub fn save_farms(&self, user_mobile: &str, farms: &[FarmRecord]) {
    self.save_entry(
      CacheDomain::FarmRecords,
      None,
      &farms,
      Discriminator::user(user_mobile),
    );
  }

  pub fn load_farms(&self, user_mobile: &str) -> Option<Vec<FarmRecord>> {
    self
      .load_entry(
        CacheDomain::FarmRecords,
        None,
        &Discriminator::user(user_mobile),
      )
      .map(|e| e.payload)
  }

  // ==========================================================================
  // Domain-wide queries
  // ==========================================================================

  /// Drop every entry of `domain`.
  pub fn clear_domain(&self, domain: CacheDomain) {
    for key in self.keys_of(domain) {
      self.remove_key(&key);
    }
    tracing::debug!("cache: cleared {}", domain);
  }

  pub fn clear_all(&self) {
    for domain in CacheDomain::ALL {
      self.clear_domain(domain);
    }
  }

  /// Whether `domain` has no entry within its TTL. Never modifies storage.
  pub fn is_expired(&self, domain: CacheDomain) -> bool {
    self.info_for(domain).expired
  }

  /// Whether a reader with `current` context would miss: no entry, expired,
  /// or written for a different context.
  pub fn needs_refresh(&self, domain: CacheDomain, current: &Discriminator) -> bool {
    match self.latest_meta(domain) {
      Some(meta) => {
        domain.is_expired_at(meta.timestamp, Utc::now()) || !meta.discriminator.matches(current)
      }
      None => true,
    }
  }

  /// Age and expiry of every domain, derived from stored timestamps only.
  pub fn cache_info(&self) -> CacheInfo {
    CacheInfo {
      domains: CacheDomain::ALL
        .into_iter()
        .map(|domain| self.info_for(domain))
        .collect(),
    }
  }

  pub fn info_for(&self, domain: CacheDomain) -> DomainInfo {
    let now = Utc::now();
    match self.latest_meta(domain) {
      Some(meta) => DomainInfo {
        domain,
        present: true,
        cached_at: Some(meta.timestamp),
        age_minutes: Some((now - meta.timestamp).num_minutes()),
        expired: domain.is_expired_at(meta.timestamp, now),
      },
      None => DomainInfo {
        domain,
        present: false,
        cached_at: None,
        age_minutes: None,
        expired: true,
      },
    }
  }

  // ==========================================================================
  // Envelope plumbing
  // ==========================================================================

  pub(crate) fn save_entry<T: Serialize + ?Sized>(
    &self,
    domain: CacheDomain,
    scope: Option<&str>,
    payload: &T,
    discriminator: Discriminator,
  ) {
    let key = build_cache_key(domain, scope);
    let envelope = CacheEnvelope {
      payload,
      timestamp: Utc::now(),
      discriminator,
    };

    let raw = match serde_json::to_string(&envelope) {
      Ok(raw) => raw,
      Err(e) => {
        tracing::warn!("cache: could not serialize {}: {}", key, e);
        return;
      }
    };

    if let Err(e) = self.store.set(&key, &raw) {
      tracing::warn!("cache: could not write {}: {}", key, e);
    }
  }

  /// Read a valid entry, purging it if unreadable or expired.
  pub(crate) fn load_entry<T: DeserializeOwned>(
    &self,
    domain: CacheDomain,
    scope: Option<&str>,
    current: &Discriminator,
  ) -> Option<CacheEnvelope<T>> {
    let key = build_cache_key(domain, scope);
    let envelope = self.peek_entry::<T>(domain, scope)?;

    if domain.is_expired_at(envelope.timestamp, Utc::now()) {
      tracing::debug!("cache: {} expired", key);
      self.remove_key(&key);
      return None;
    }

    if !envelope.discriminator.matches(current) {
      tracing::debug!("cache: {} written for another context", key);
      return None;
    }

    tracing::debug!("cache: hit {}", key);
    Some(envelope)
  }

  /// Read an entry regardless of age or context. Unreadable entries are
  /// purged.
  pub(crate) fn peek_entry<T: DeserializeOwned>(
    &self,
    domain: CacheDomain,
    scope: Option<&str>,
  ) -> Option<CacheEnvelope<T>> {
    let key = build_cache_key(domain, scope);
    let raw = self.read_raw(&key)?;

    match serde_json::from_str(&raw) {
      Ok(envelope) => Some(envelope),
      Err(e) => {
        tracing::warn!("cache: discarding unreadable {}: {}", key, e);
        self.remove_key(&key);
        None
      }
    }
  }

  /// Metadata of the newest entry of `domain`, without side effects.
  fn latest_meta(&self, domain: CacheDomain) -> Option<EnvelopeMeta> {
    self
      .keys_of(domain)
      .iter()
      .filter_map(|key| self.read_raw(key))
      .filter_map(|raw| serde_json::from_str::<EnvelopeMeta>(&raw).ok())
      .max_by_key(|meta| meta.timestamp)
  }

  fn keys_of(&self, domain: CacheDomain) -> Vec<String> {
    if !domain.is_scoped() {
      return vec![build_cache_key(domain, None)];
    }
    let prefix = build_cache_key(domain, None);
    match self.store.keys_with_prefix(&prefix) {
      Ok(keys) => keys,
      Err(e) => {
        tracing::warn!("cache: could not list {} entries: {}", domain, e);
        Vec::new()
      }
    }
  }

  fn read_raw(&self, key: &str) -> Option<String> {
    match self.store.get(key) {
      Ok(raw) => raw,
      Err(e) => {
        tracing::warn!("cache: could not read {}: {}", key, e);
        None
      }
    }
  }

  fn remove_key(&self, key: &str) {
    if let Err(e) = self.store.remove(key) {
      tracing::warn!("cache: could not remove {}: {}", key, e);
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use chrono::Duration;
  use color_eyre::{eyre::eyre, Result};

  pub(crate) fn manager() -> (CacheManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (CacheManager::new(store.clone()), store)
  }

  /// Rewrite the stored timestamp of `key` to `age` in the past.
  pub(crate) fn backdate(store: &MemoryStore, key: &str, age: Duration) {
    let raw = store.get(key).unwrap().unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    value["timestamp"] = serde_json::to_value(Utc::now() - age).unwrap();
    store.set(key, &value.to_string()).unwrap();
  }

  pub(crate) fn price(commodity: &str, modal: f64) -> MarketPrice {
    MarketPrice {
      commodity: commodity.to_string(),
      market: "Lasalgaon".to_string(),
      state: Some("Maharashtra".to_string()),
      district: None,
      min_price: modal - 100.0,
      max_price: modal + 100.0,
      modal_price: modal,
      arrival_date: None,
    }
  }

  pub(crate) fn weather() -> WeatherSnapshot {
    WeatherSnapshot {
      location_name: Some("Bengaluru".to_string()),
      temperature_c: 27.5,
      humidity: Some(64.0),
      condition: "Partly cloudy".to_string(),
      wind_kph: Some(11.0),
      rain_chance: Some(0.2),
      observed_at: None,
    }
  }

  fn tasks() -> Vec<WorkflowTask> {
    vec![
      WorkflowTask {
        id: "t1".into(),
        title: "Check soil moisture".into(),
        estimated_time: "15 min".into(),
        completed: false,
      },
      WorkflowTask {
        id: "t2".into(),
        title: "Spray neem oil".into(),
        estimated_time: "1 hr".into(),
        completed: false,
      },
    ]
  }

  fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_selected_crops_never_expire() {
    let (cache, store) = manager();
    cache.save_selected_crops(&names(&["Onion", "Tomato"]));
    backdate(&store, "selected_crops", Duration::days(400));

    assert_eq!(
      cache.load_selected_crops(),
      Some(names(&["Onion", "Tomato"]))
    );
  }

  #[test]
  fn test_price_snapshot_expires_and_is_purged() {
    let (cache, store) = manager();
    let commodities = names(&["Onion", "Wheat"]);
    cache.save_price_data(&[price("Onion", 1800.0)], &commodities);
    assert!(cache.load_price_data(&commodities).is_some());

    backdate(&store, "price_snapshot", Duration::minutes(11));

    assert_eq!(cache.load_price_data(&commodities), None);
    assert_eq!(store.get("price_snapshot").unwrap(), None);
  }

  #[test]
  fn test_price_snapshot_requires_same_commodity_set() {
    let (cache, store) = manager();
    cache.save_price_data(&[price("Onion", 1800.0)], &names(&["Wheat", "Onion"]));

    assert!(cache.load_price_data(&names(&["Onion", "Wheat"])).is_some());
    assert_eq!(cache.load_price_data(&names(&["Onion"])), None);
    // Mismatch leaves the entry for the next save to replace
    assert!(store.get("price_snapshot").unwrap().is_some());
  }

  #[test]
  fn test_home_weather_location_drift_invalidates() {
    let (cache, _store) = manager();
    cache.save_home_weather(&weather(), GeoPoint::new(12.97, 77.59));

    assert_eq!(cache.load_home_weather(GeoPoint::new(13.20, 77.60)), None);
    assert_eq!(
      cache.load_home_weather(GeoPoint::new(12.99, 77.61)),
      Some(weather())
    );
  }

  #[test]
  fn test_home_alerts_by_user_or_location() {
    let (cache, _store) = manager();
    let alerts = vec![Alert {
      id: "a1".into(),
      title: "Heavy rain".into(),
      message: "Postpone spraying".into(),
      severity: crate::upstream::types::AlertSeverity::Warning,
      issued_at: None,
    }];
    let here = GeoPoint::new(18.52, 73.85);
    cache.save_home_alerts(&alerts, Some("9800000001"), Some(here));

    assert!(cache.load_home_alerts(Some("9800000001"), None).is_some());
    assert!(cache.load_home_alerts(Some("9800000002"), Some(here)).is_none());
    assert!(cache.load_home_alerts(None, Some(here)).is_some());
  }

  #[test]
  fn test_farm_records_scoped_to_user_and_expire_after_five_minutes() {
    let (cache, store) = manager();
    let farms = vec![FarmRecord {
      id: "f1".into(),
      name: "River plot".into(),
      crop: Some("Sugarcane".into()),
      area_acres: Some(2.5),
      location: None,
    }];
    cache.save_farms("9800000001", &farms);

    assert_eq!(cache.load_farms("9800000001"), Some(farms.clone()));
    assert_eq!(cache.load_farms("9800000002"), None);

    backdate(&store, "farm_records", Duration::minutes(6));
    assert_eq!(cache.load_farms("9800000001"), None);
  }

  #[test]
  fn test_workflow_task_toggle_persists() {
    let (cache, _store) = manager();
    cache.save_workflow("plot-1", Some("chat-1"), &tasks());

    let updated = cache.set_task_completed("plot-1", "t2", true).unwrap();
    assert!(updated.completed);

    let reloaded = cache.load_workflow("plot-1", None).unwrap();
    let task = reloaded.iter().find(|t| t.id == "t2").unwrap();
    assert!(task.completed);
    assert_eq!(task.title, "Spray neem oil");
    assert_eq!(task.estimated_time, "1 hr");

    // Session association survives the mutation
    assert!(cache.load_workflow("plot-1", Some("chat-1")).is_some());
    assert!(cache.load_workflow("plot-1", Some("chat-2")).is_none());
  }

  /// Store that stalls edited-entry reads so concurrent edits overlap.
  struct SlowReads {
    inner: MemoryStore,
  }

  impl KvStore for SlowReads {
    fn get(&self, key: &str) -> Result<Option<String>> {
      let value = self.inner.get(key);
      if key.starts_with("workflow:") || key == "previous_prices" {
        std::thread::sleep(std::time::Duration::from_millis(30));
      }
      value
    }
    fn set(&self, key: &str, value: &str) -> Result<()> {
      self.inner.set(key, value)
    }
    fn remove(&self, key: &str) -> Result<()> {
      self.inner.remove(key)
    }
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
      self.inner.keys_with_prefix(prefix)
    }
  }

  #[test]
  fn test_concurrent_task_toggles_are_all_kept() {
    let cache = CacheManager::new(Arc::new(SlowReads {
      inner: MemoryStore::new(),
    }));
    cache.save_workflow("plot-1", None, &tasks());

    std::thread::scope(|scope| {
      for task_id in ["t1", "t2"] {
        let cache = cache.clone();
        scope.spawn(move || {
          assert!(cache.set_task_completed("plot-1", task_id, true).is_some());
        });
      }
    });

    let reloaded = cache.load_workflow("plot-1", None).unwrap();
    assert!(reloaded.iter().all(|t| t.completed));
  }

  #[test]
  fn test_concurrent_price_records_are_all_kept() {
    let cache = CacheManager::new(Arc::new(SlowReads {
      inner: MemoryStore::new(),
    }));

    std::thread::scope(|scope| {
      for commodity in ["Onion", "Wheat", "Tomato", "Maize"] {
        let cache = cache.clone();
        scope.spawn(move || {
          cache.record_price_changes(&[price(commodity, 1000.0)]);
        });
      }
    });

    assert_eq!(cache.load_previous_prices().unwrap().len(), 4);
  }

  #[test]
  fn test_clear_workflow_drops_only_that_plot() {
    let (cache, store) = manager();
    cache.save_workflow("plot-1", None, &tasks());
    cache.save_workflow("plot-2", None, &tasks());

    cache.clear_workflow("plot-1");

    assert!(cache.load_workflow("plot-1", None).is_none());
    assert_eq!(store.get("workflow:plot-1").unwrap(), None);
    assert_eq!(cache.load_workflow("plot-2", None).unwrap().len(), 2);
  }

  #[test]
  fn test_home_weather_and_alerts_expire_after_thirty_minutes() {
    let (cache, store) = manager();
    let here = GeoPoint::new(12.97, 77.59);
    let alerts = vec![Alert {
      id: "a1".into(),
      title: "Heat wave".into(),
      message: "Irrigate in the evening".into(),
      severity: crate::upstream::types::AlertSeverity::Critical,
      issued_at: None,
    }];
    cache.save_home_weather(&weather(), here);
    cache.save_home_alerts(&alerts, Some("9800000001"), None);

    backdate(&store, "home_weather", Duration::minutes(29));
    backdate(&store, "home_alerts", Duration::minutes(29));
    assert_eq!(cache.load_home_weather(here), Some(weather()));
    assert_eq!(cache.load_home_alerts(Some("9800000001"), None), Some(alerts));

    backdate(&store, "home_weather", Duration::minutes(31));
    backdate(&store, "home_alerts", Duration::minutes(31));
    assert_eq!(cache.load_home_weather(here), None);
    assert_eq!(cache.load_home_alerts(Some("9800000001"), None), None);
    assert_eq!(store.get("home_weather").unwrap(), None);
    assert_eq!(store.get("home_alerts").unwrap(), None);
  }

  #[test]
  fn test_workflow_delete_and_unknown_task() {
    let (cache, _store) = manager();
    cache.save_workflow("plot-1", None, &tasks());

    assert!(cache.set_task_completed("plot-1", "missing", true).is_none());
    assert!(cache.set_task_completed("plot-9", "t1", true).is_none());

    assert!(cache.delete_task("plot-1", "t1"));
    assert!(!cache.delete_task("plot-1", "t1"));
    assert_eq!(cache.load_workflow("plot-1", None).unwrap().len(), 1);
  }

  #[test]
  fn test_workflows_are_kept_per_plot() {
    let (cache, _store) = manager();
    cache.save_workflow("plot-1", None, &tasks());
    cache.save_workflow("plot-2", None, &tasks()[..1]);

    assert_eq!(cache.load_workflow("plot-1", None).unwrap().len(), 2);
    assert_eq!(cache.load_workflow("plot-2", None).unwrap().len(), 1);

    cache.clear_domain(CacheDomain::Workflow);
    assert!(cache.load_workflow("plot-1", None).is_none());
    assert!(cache.load_workflow("plot-2", None).is_none());
  }

  #[test]
  fn test_record_price_changes() {
    let (cache, _store) = manager();

    let first = cache.record_price_changes(&[price("Onion", 1800.0)]);
    assert_eq!(first["Onion"].trend, crate::upstream::types::PriceTrend::New);

    let second = cache.record_price_changes(&[price("Onion", 1750.0), price("Wheat", 2400.0)]);
    assert_eq!(second["Onion"].trend, crate::upstream::types::PriceTrend::Down);
    assert_eq!(second["Onion"].change(), Some(-50.0));
    assert_eq!(second["Wheat"].trend, crate::upstream::types::PriceTrend::New);

    let stored = cache.load_previous_prices().unwrap();
    assert_eq!(stored["Onion"], 1750.0);
    assert_eq!(stored["Wheat"], 2400.0);
  }

  #[test]
  fn test_corrupt_entry_is_purged() {
    let (cache, store) = manager();
    store.set("home_market_prices", "{not json").unwrap();

    assert_eq!(cache.load_home_prices(), None);
    assert_eq!(store.get("home_market_prices").unwrap(), None);
  }

  #[test]
  fn test_cache_info_is_read_only() {
    let (cache, store) = manager();
    cache.save_home_prices(&[price("Tomato", 900.0)]);
    cache.save_price_data(&[price("Onion", 1800.0)], &names(&["Onion"]));
    cache.save_workflow("plot-1", None, &tasks());
    backdate(&store, "price_snapshot", Duration::minutes(25));

    let info = cache.cache_info();
    assert_eq!(info.domains.len(), CacheDomain::ALL.len());

    let prices = info.get(CacheDomain::HomeMarketPrices).unwrap();
    assert!(prices.present);
    assert!(!prices.expired);
    assert_eq!(prices.age_minutes, Some(0));

    let snapshot = info.get(CacheDomain::PriceSnapshot).unwrap();
    assert!(snapshot.expired);
    assert_eq!(snapshot.age_minutes, Some(25));
    // Reporting does not purge
    assert!(store.get("price_snapshot").unwrap().is_some());

    let workflow = info.get(CacheDomain::Workflow).unwrap();
    assert!(workflow.present);
    assert!(!workflow.expired);

    let weather = info.get(CacheDomain::HomeWeather).unwrap();
    assert!(!weather.present);
    assert!(weather.expired);
  }

  #[test]
  fn test_needs_refresh() {
    let (cache, store) = manager();
    let here = GeoPoint::new(12.97, 77.59);
    let context = Discriminator::location(here);
    assert!(cache.needs_refresh(CacheDomain::HomeWeather, &context));

    cache.save_home_weather(&weather(), here);
    assert!(!cache.needs_refresh(CacheDomain::HomeWeather, &context));
    assert!(cache.needs_refresh(
      CacheDomain::HomeWeather,
      &Discriminator::location(GeoPoint::new(14.0, 77.59))
    ));

    backdate(&store, "home_weather", Duration::minutes(31));
    assert!(cache.needs_refresh(CacheDomain::HomeWeather, &context));
    assert!(cache.is_expired(CacheDomain::HomeWeather));
  }

  #[test]
  fn test_clear_home_cache_keeps_other_domains() {
    let (cache, _store) = manager();
    cache.save_home_prices(&[price("Tomato", 900.0)]);
    cache.save_home_weather(&weather(), GeoPoint::new(12.97, 77.59));
    cache.save_selected_crops(&names(&["Tomato"]));

    cache.clear_home_cache();
    assert!(cache.load_home_prices().is_none());
    assert!(cache.is_expired(CacheDomain::HomeWeather));
    assert!(cache.load_selected_crops().is_some());

    cache.clear_all();
    assert!(cache.load_selected_crops().is_none());
  }

  /// Store whose every operation fails.
  struct BrokenStore;

  impl KvStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
      Err(eyre!("disk I/O error"))
    }
    fn set(&self, _key: &str, _value: &str) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }
    fn remove(&self, _key: &str) -> Result<()> {
      Err(eyre!("disk I/O error"))
    }
    fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
      Err(eyre!("disk I/O error"))
    }
  }

  #[test]
  fn test_storage_failures_read_as_misses() {
    let cache = CacheManager::new(Arc::new(BrokenStore));

    cache.save_home_prices(&[price("Tomato", 900.0)]);
    cache.save_workflow("plot-1", None, &tasks());
    assert!(cache.load_home_prices().is_none());
    assert!(cache.load_workflow("plot-1", None).is_none());
    assert!(cache.set_task_completed("plot-1", "t1", true).is_none());
    assert!(!cache.cache_info().get(CacheDomain::Workflow).unwrap().present);
    cache.clear_all();
  }
}
