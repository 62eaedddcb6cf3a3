//! Offline-resilient request layer for the farmer advisory client.
//!
//! Writes made without connectivity are queued durably and replayed when the
//! network returns; reads are served from TTL-bound domain caches.

pub mod app;
pub mod cache;
pub mod config;
pub mod logging;
pub mod net;
pub mod preload;
pub mod queue;
pub mod store;
pub mod upstream;
pub mod worker;
