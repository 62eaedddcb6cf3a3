//! Advisory backend: payload types and the HTTP collaborator.

mod cached_client;
mod client;
pub mod types;

pub use cached_client::CachedUpstream;
pub use client::UpstreamClient;
