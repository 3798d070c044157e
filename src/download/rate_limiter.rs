//! Per-domain request pacing.
//!
//! [`RateLimiter`] enforces a minimum gap between consecutive requests to
//! the same host. Requests to different hosts never wait on each other.
//! It paces landing-page and metadata fetches during acquisition and the
//! chat-completions classifier during screening.
//!
//! ```
//! use std::time::Duration;
//! use sift_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_millis(500));
//! limiter.acquire("https://doi.org/10.1/a").await;
//! limiter.acquire("https://doi.org/10.1/b").await; // waits ~500ms
//! limiter.acquire("https://api.crossref.org/works").await; // no wait
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Shared per-domain pacer. Wrap in `Arc` to share across tasks.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    disabled: bool,
    /// Entries are `Arc`ed so the map shard lock is released before awaiting.
    domains: DashMap<String, Arc<DomainState>>,
}

#[derive(Debug, Default)]
struct DomainState {
    /// `None` until the first request; the first request never waits.
    last_request: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl DomainState {
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    /// Creates a pacer with the given minimum interval per domain.
    ///
    /// A zero interval behaves like [`RateLimiter::disabled`].
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        debug!(interval_ms = min_interval.as_millis(), "creating rate limiter");
        Self {
            min_interval,
            disabled: min_interval.is_zero(),
            domains: DashMap::new(),
        }
    }

    /// Pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            min_interval: Duration::ZERO,
            disabled: true,
            domains: DashMap::new(),
        }
    }

    /// Pacer for a requests-per-minute budget (`0` disables pacing).
    #[must_use]
    pub fn per_minute(rpm: u32) -> Self {
        if rpm == 0 {
            Self::disabled()
        } else {
            Self::new(Duration::from_secs(60) / rpm)
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until a request to `url`'s domain is allowed, then records it.
    #[instrument(skip(self), fields(domain))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let domain = extract_domain(url);
        tracing::Span::current().record("domain", domain.as_str());

        let state = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(DomainState::default()))
            .clone();

        let mut last_request = state.last_request.lock().await;
        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let delay = self.min_interval - elapsed;
                let cumulative = state.add_cumulative_delay(delay);
                debug!(
                    domain = %domain,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "pacing request"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        domain = %domain,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "heavy pacing on this domain"
                    );
                }
                tokio::time::sleep(delay).await;
            }
        }
        *last_request = Some(Instant::now());
    }

    /// Records a server-mandated wait (Retry-After) against `url`'s domain.
    #[instrument(skip(self), fields(domain))]
    pub fn record_rate_limit(&self, url: &str, delay: Duration) {
        let domain = extract_domain(url);
        tracing::Span::current().record("domain", domain.as_str());

        let state = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(DomainState::default()))
            .clone();
        let cumulative = state.add_cumulative_delay(delay);
        debug!(
            domain = %domain,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                domain = %domain,
                cumulative_delay_secs = cumulative.as_secs(),
                "server keeps rate limiting this domain"
            );
        }
    }
}

/// Lowercased host of `url`, or `"unknown"` when it cannot be parsed.
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After value (delta seconds or HTTP-date), capped at 5 minutes.
///
/// Past dates yield zero; negative or unparseable values yield `None`.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let value = header_value.trim();

    let delay = if let Ok(seconds) = value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value ignored");
            return None;
        };
        Duration::from_secs(seconds)
    } else if let Ok(when) = httpdate::parse_http_date(value) {
        when.duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO)
    } else {
        debug!(value, "unparseable Retry-After value");
        return None;
    };

    if delay > MAX_RETRY_AFTER {
        warn!(
            delay_secs = delay.as_secs(),
            cap_secs = MAX_RETRY_AFTER.as_secs(),
            "capping Retry-After"
        );
        return Some(MAX_RETRY_AFTER);
    }
    Some(delay)
}
