//! Concurrent PDF downloading.
//!
//! - [`HttpClient`]: the shared, pooled transport; streams PDFs to disk with
//!   signature validation.
//! - [`DownloadEngine`]: global and per-host bounded concurrency, retry with
//!   jittered exponential backoff, open-access fallback.
//! - [`RateLimiter`]: per-domain request pacing for page and API fetches.
//! - [`filename`]: collision-free, filesystem-safe target names.

mod client;
pub mod constants;
mod engine;
mod error;
pub mod filename;
pub mod rate_limiter;
mod retry;

pub use client::HttpClient;
pub use engine::{
    DEFAULT_CONCURRENCY, DEFAULT_PER_HOST_CONCURRENCY, DownloadEngine, DownloadOutcome,
    DownloadStats, DownloadTask, EngineError, TaskMetadata,
};
pub use error::DownloadError;
pub use rate_limiter::{RateLimiter, extract_domain, parse_retry_after};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};

// No module-local Result aliases; spell out `Result<T, DownloadError>`.
