//! Shared download tuning constants.

use std::time::Duration;

/// TCP connect timeout for file downloads.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Whole-request timeout for file downloads (large PDFs).
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Whole-request timeout for landing pages and metadata APIs.
pub const PAGE_TIMEOUT_SECS: u64 = 30;

/// Redirects followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

/// Idle pooled connections kept per host.
pub const POOL_MAX_IDLE_PER_HOST: usize = 8;

/// `Accept` header sent with download requests.
pub const PDF_ACCEPT: &str = "application/pdf,application/octet-stream,*/*;q=0.8";

/// Leading bytes of every PDF file.
pub const PDF_SIGNATURE: &[u8; 4] = b"%PDF";

/// Warning threshold for cumulative pacing delay per domain.
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Upper bound on a server-supplied Retry-After wait.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);
