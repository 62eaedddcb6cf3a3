//! Network access: connectivity tracking, probing and the queue-aware client.

pub mod client;
pub mod error;
pub mod probe;
pub mod status;

pub use client::{Delivery, FetchRequest, HttpResponse, SmartClient};
pub use error::FetchError;
pub use probe::{Connectivity, ConnectivityProbe};
pub use status::NetworkStatus;
