//! Client side of the remote analysis service
//!
//! Chunked upload, task creation and polling over REST/JSON with bearer
//! auth. Transient failures are retried according to a [`RetryPolicy`].

pub mod client;
pub mod retry;
pub mod types;

pub use client::RemoteTaskClient;
pub use retry::{RecordingSleeper, RetryPolicy, TokioSleeper};
pub use types::{RateLimitStatus, RequestBody};
