//! Durable queue of requests waiting for connectivity.

mod durable;
mod request;
mod sender;

pub use durable::RequestQueue;
pub use request::{DrainReport, HttpMethod, NewRequest, QueuedRequest, RetryPolicy};
pub use sender::{HttpSender, RequestSender};
