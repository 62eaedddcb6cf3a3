//! TTL-bound snapshots over independent data domains.
//!
//! This module provides the local cache the UI paints from:
//! - One keyed entry per domain (one per plot for workflows)
//! - Per-domain expiry and context discriminators (location, user, crops)
//! - Read-through fetching with stale fallback when upstream is unreachable
//! - Local-first workflow task edits

mod domain;
mod layer;
mod manager;
mod traits;

pub use domain::{
  build_cache_key, CacheDomain, CacheEnvelope, Discriminator, GeoPoint, LOCATION_TOLERANCE_DEG,
};
pub use manager::{CacheInfo, CacheManager, DomainInfo};
pub use traits::{CacheResult, CacheSource};
