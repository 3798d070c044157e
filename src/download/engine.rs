//! Concurrent download engine.
//!
//! Every [`DownloadTask`] runs in its own Tokio task. A task first takes a
//! slot from the global semaphore, then one from its host's semaphore
//! (created lazily, guarded by a read/write lock with double-checked
//! insertion). Permits are RAII guards, so they are released on every
//! exit path, host first.
//!
//! Failed attempts are classified and retried per [`RetryPolicy`]. When a
//! task still fails and carries a DOI, one open-access lookup may supply a
//! replacement URL for a final retry sequence.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sift_core::download::{DownloadEngine, HttpClient, RetryPolicy};
//!
//! # async fn example(tasks: Vec<sift_core::DownloadTask>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::new(25, 4, RetryPolicy::from_max_retries(3))?;
//! let outcomes = engine.run(tasks, &HttpClient::new()?).await;
//! let failed = outcomes.iter().filter(|o| !o.success).count();
//! println!("{failed} failed");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::rate_limiter::{extract_domain, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::{DownloadError, HttpClient};
use crate::resolver::OpenAccessLookup;
use crate::resolver::doi::doi_from_url;

const MIN_CONCURRENCY: usize = 1;
const MAX_CONCURRENCY: usize = 100;
const MIN_PER_HOST: usize = 1;
const MAX_PER_HOST: usize = 25;

/// Default global concurrency.
pub const DEFAULT_CONCURRENCY: usize = 25;

/// Default concurrency per host.
pub const DEFAULT_PER_HOST_CONCURRENCY: usize = 4;

/// Invalid engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Global concurrency outside the allowed range.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// Per-host concurrency outside the allowed range.
    #[error(
        "invalid per-host concurrency value {value}: must be between {MIN_PER_HOST} and {MAX_PER_HOST}"
    )]
    InvalidHostConcurrency {
        /// The rejected value.
        value: usize,
    },
}

/// Bibliographic fields carried by a task for fallbacks and reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskMetadata {
    pub title: Option<String>,
    pub authors: Option<String>,
    pub year: Option<String>,
    pub doi: Option<String>,
}

/// One PDF to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Report key: the input URL for URL lists, the 1-based row for tables.
    pub id: String,
    /// Original locator (landing page, DOI URL, or direct file URL).
    pub source_url: String,
    /// Concrete PDF location. Replaced at most once by the open-access fallback.
    pub resolved_url: String,
    /// Destination path, unique within the run.
    pub target_path: PathBuf,
    pub metadata: TaskMetadata,
}

impl DownloadTask {
    /// DOI from metadata, else from a `doi.org` link or DOI pattern in the source URL.
    #[must_use]
    pub fn doi(&self) -> Option<String> {
        self.metadata
            .doi
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .or_else(|| doi_from_url(&self.source_url))
    }
}

/// Terminal result for one task.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub task: DownloadTask,
    pub success: bool,
    /// Human-readable failure reason; `None` on success.
    pub error: Option<String>,
    /// Download attempts made across primary and fallback URLs.
    pub attempts: u32,
    /// Whether the open-access fallback was consulted.
    pub used_fallback: bool,
}

impl DownloadOutcome {
    /// File name of the written PDF, on success.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        if !self.success {
            return None;
        }
        self.task
            .target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    fn failed(task: DownloadTask, reason: String, attempts: u32, used_fallback: bool) -> Self {
        Self {
            task,
            success: false,
            error: Some(reason),
            attempts,
            used_fallback,
        }
    }
}

/// Live counters for a run, polled by the progress spinner.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    fallbacks: AtomicUsize,
}

impl DownloadStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Completed plus failed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed()
    }

    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Transfers currently holding both permits.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest simultaneous transfer count seen.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    /// Open-access lookups performed.
    #[must_use]
    pub fn fallbacks(&self) -> usize {
        self.fallbacks.load(Ordering::SeqCst)
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_fallbacks(&self) {
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
    }

    fn start_transfer(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn finish_transfer(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lazily populated per-host semaphores.
#[derive(Debug)]
struct HostLimits {
    per_host: usize,
    hosts: RwLock<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimits {
    fn new(per_host: usize) -> Self {
        Self {
            per_host,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the semaphore for `host`, creating it exactly once.
    fn semaphore_for(&self, host: &str) -> Arc<Semaphore> {
        {
            let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = hosts.get(host) {
                return Arc::clone(existing);
            }
        }
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host))),
        )
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.hosts.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Shared state handed to each spawned task.
struct Worker {
    client: HttpClient,
    policy: RetryPolicy,
    global: Arc<Semaphore>,
    hosts: Arc<HostLimits>,
    stats: Arc<DownloadStats>,
    open_access: Option<Arc<dyn OpenAccessLookup>>,
}

/// Bounded-concurrency downloader.
pub struct DownloadEngine {
    concurrency: usize,
    global: Arc<Semaphore>,
    hosts: Arc<HostLimits>,
    retry_policy: RetryPolicy,
    stats: Arc<DownloadStats>,
    open_access: Option<Arc<dyn OpenAccessLookup>>,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("concurrency", &self.concurrency)
            .field("per_host", &self.hosts.per_host)
            .field("retry_policy", &self.retry_policy)
            .field("open_access", &self.open_access.is_some())
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when `concurrency` is outside 1..=100 or
    /// `per_host` outside 1..=25.
    #[instrument(level = "debug", skip(retry_policy))]
    pub fn new(
        concurrency: usize,
        per_host: usize,
        retry_policy: RetryPolicy,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }
        if !(MIN_PER_HOST..=MAX_PER_HOST).contains(&per_host) {
            return Err(EngineError::InvalidHostConcurrency { value: per_host });
        }
        debug!(
            concurrency,
            per_host,
            max_attempts = retry_policy.max_attempts(),
            "creating download engine"
        );
        Ok(Self {
            concurrency,
            global: Arc::new(Semaphore::new(concurrency)),
            hosts: Arc::new(HostLimits::new(per_host)),
            retry_policy,
            stats: Arc::new(DownloadStats::new()),
            open_access: None,
        })
    }

    /// Enables the open-access fallback for tasks with a DOI.
    #[must_use]
    pub fn with_open_access(mut self, lookup: Arc<dyn OpenAccessLookup>) -> Self {
        self.open_access = Some(lookup);
        self
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn per_host(&self) -> usize {
        self.hosts.per_host
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Live counters; clone the `Arc` to poll from a progress display.
    #[must_use]
    pub fn stats(&self) -> Arc<DownloadStats> {
        Arc::clone(&self.stats)
    }

    /// Runs every task and returns one outcome per task, in input order.
    #[instrument(skip(self, tasks, client), fields(tasks = tasks.len()))]
    pub async fn run(&self, tasks: Vec<DownloadTask>, client: &HttpClient) -> Vec<DownloadOutcome> {
        let worker = Arc::new(Worker {
            client: client.clone(),
            policy: self.retry_policy.clone(),
            global: Arc::clone(&self.global),
            hosts: Arc::clone(&self.hosts),
            stats: Arc::clone(&self.stats),
            open_access: self.open_access.clone(),
        });

        info!("starting downloads");
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let worker = Arc::clone(&worker);
            let fallback_copy = task.clone();
            handles.push((
                fallback_copy,
                tokio::spawn(async move { worker.process(task).await }),
            ));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (task, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "download task panicked");
                    self.stats.increment_failed();
                    outcomes.push(DownloadOutcome::failed(
                        task,
                        format!("Download failed: internal error ({e})"),
                        0,
                        false,
                    ));
                }
            }
        }

        info!(
            completed = self.stats.completed(),
            failed = self.stats.failed(),
            retried = self.stats.retried(),
            fallbacks = self.stats.fallbacks(),
            "downloads finished"
        );
        outcomes
    }
}

impl Worker {
    #[instrument(skip(self, task), fields(task_id = %task.id, url = %task.resolved_url))]
    async fn process(&self, mut task: DownloadTask) -> DownloadOutcome {
        let Ok(_global) = Arc::clone(&self.global).acquire_owned().await else {
            self.stats.increment_failed();
            return DownloadOutcome::failed(task, "Download failed: engine closed".into(), 0, false);
        };

        let primary_url = task.resolved_url.clone();
        let (primary_error, mut attempts) = match self.attempt_url(&primary_url, &task).await {
            Ok(attempts) => return self.succeeded(task, attempts, false),
            Err(failure) => failure,
        };

        let (Some(lookup), Some(doi)) = (self.open_access.as_ref(), task.doi()) else {
            self.stats.increment_failed();
            return DownloadOutcome::failed(
                task,
                format!("Download failed: {primary_error}"),
                attempts,
                false,
            );
        };

        self.stats.increment_fallbacks();
        info!(doi = %doi, "primary source failed, trying open-access lookup");
        let fallback_url = match lookup.find_pdf(&doi).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                self.stats.increment_failed();
                return DownloadOutcome::failed(
                    task,
                    format!(
                        "Download failed: {primary_error}; open-access fallback: no open-access copy for {doi}"
                    ),
                    attempts,
                    true,
                );
            }
            Err(e) => {
                self.stats.increment_failed();
                return DownloadOutcome::failed(
                    task,
                    format!("Download failed: {primary_error}; open-access fallback: {e}"),
                    attempts,
                    true,
                );
            }
        };

        task.resolved_url = fallback_url.clone();
        match self.attempt_url(&fallback_url, &task).await {
            Ok(more) => self.succeeded(task, attempts + more, true),
            Err((fallback_error, more)) => {
                attempts += more;
                self.stats.increment_failed();
                DownloadOutcome::failed(
                    task,
                    format!(
                        "Download failed: {primary_error}; open-access fallback failed: {fallback_error}"
                    ),
                    attempts,
                    true,
                )
            }
        }
    }

    fn succeeded(&self, task: DownloadTask, attempts: u32, used_fallback: bool) -> DownloadOutcome {
        self.stats.increment_completed();
        info!(task_id = %task.id, path = %task.target_path.display(), "download succeeded");
        DownloadOutcome {
            task,
            success: true,
            error: None,
            attempts,
            used_fallback,
        }
    }

    /// Runs the retry sequence for `url` while holding its host permit.
    async fn attempt_url(
        &self,
        url: &str,
        task: &DownloadTask,
    ) -> Result<u32, (DownloadError, u32)> {
        let host = extract_domain(url);
        let host_slot = self.hosts.semaphore_for(&host);
        let Ok(_host_permit) = host_slot.acquire_owned().await else {
            return Err((DownloadError::invalid_url(url), 0));
        };

        self.stats.start_transfer();
        let result = download_with_retry(
            &self.client,
            url,
            task,
            &self.policy,
            &self.stats,
        )
        .await;
        self.stats.finish_transfer();
        result
    }
}

/// Server-mandated wait for 429/503 responses carrying Retry-After.
fn retry_after_delay(error: &DownloadError) -> Option<Duration> {
    match error {
        DownloadError::HttpStatus {
            status: 429 | 503,
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}

/// Attempts `url` up to the policy's bound. Returns the attempt count.
#[instrument(skip(client, task, policy, stats), fields(task_id = %task.id))]
async fn download_with_retry(
    client: &HttpClient,
    url: &str,
    task: &DownloadTask,
    policy: &RetryPolicy,
    stats: &DownloadStats,
) -> Result<u32, (DownloadError, u32)> {
    let mut attempt = 0u32;
    let mut honored_retry_after = false;

    loop {
        attempt += 1;
        debug!(attempt, "attempting download");

        let error = match client.download_pdf(url, &task.target_path).await {
            Ok(_) => return Ok(attempt),
            Err(e) => e,
        };

        let failure_type = classify_error(&error);
        let server_delay = if honored_retry_after {
            None
        } else {
            retry_after_delay(&error)
        };

        match policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next_attempt,
            } => {
                if let Some(wait) = server_delay {
                    honored_retry_after = true;
                    info!(
                        url,
                        wait_ms = wait.as_millis(),
                        "honoring Retry-After before backoff"
                    );
                    tokio::time::sleep(wait).await;
                }
                info!(
                    url,
                    attempt = next_attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    rate_limited = failure_type == FailureType::RateLimited,
                    error = %error,
                    "retrying download"
                );
                stats.increment_retried();
                tokio::time::sleep(delay).await;
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(url, %reason, "not retrying download");
                return Err((error, attempt));
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_validates_limits() {
        assert!(DownloadEngine::new(1, 1, RetryPolicy::default()).is_ok());
        assert!(DownloadEngine::new(100, 25, RetryPolicy::default()).is_ok());
        assert!(matches!(
            DownloadEngine::new(0, 4, RetryPolicy::default()),
            Err(EngineError::InvalidConcurrency { value: 0 })
        ));
        assert!(matches!(
            DownloadEngine::new(101, 4, RetryPolicy::default()),
            Err(EngineError::InvalidConcurrency { value: 101 })
        ));
        assert!(matches!(
            DownloadEngine::new(10, 26, RetryPolicy::default()),
            Err(EngineError::InvalidHostConcurrency { value: 26 })
        ));
    }

    #[test]
    fn test_engine_error_display_names_range() {
        let msg = EngineError::InvalidHostConcurrency { value: 0 }.to_string();
        assert!(msg.contains("per-host"));
        assert!(msg.contains("25"));
    }

    #[test]
    fn test_host_semaphores_created_once_per_host() {
        let limits = HostLimits::new(2);
        let a1 = limits.semaphore_for("a.org");
        let a2 = limits.semaphore_for("a.org");
        let b = limits.semaphore_for("b.org");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(limits.len(), 2);
        assert_eq!(a1.available_permits(), 2);
    }

    #[test]
    fn test_host_semaphores_race_free() {
        let limits = Arc::new(HostLimits::new(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limits = Arc::clone(&limits);
                std::thread::spawn(move || limits.semaphore_for("same.org"))
            })
            .collect();
        let sems: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sems.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(limits.len(), 1);
    }

    #[test]
    fn test_stats_track_peak_active() {
        let stats = DownloadStats::new();
        stats.start_transfer();
        stats.start_transfer();
        stats.finish_transfer();
        stats.start_transfer();
        assert_eq!(stats.active(), 2);
        assert_eq!(stats.peak_active(), 2);
        stats.increment_completed();
        stats.increment_failed();
        assert_eq!(stats.total(), 2);
    }

    #[test]
    fn test_retry_after_only_for_429_and_503() {
        let with = |status| {
            DownloadError::http_status_with_retry_after("https://x.org", status, Some("3".into()))
        };
        assert_eq!(retry_after_delay(&with(429)), Some(Duration::from_secs(3)));
        assert_eq!(retry_after_delay(&with(503)), Some(Duration::from_secs(3)));
        assert_eq!(retry_after_delay(&with(500)), None);
        assert_eq!(
            retry_after_delay(&DownloadError::http_status("https://x.org", 429)),
            None
        );
    }

    #[test]
    fn test_task_doi_prefers_metadata_then_url() {
        let mut task = DownloadTask {
            id: "1".into(),
            source_url: "https://doi.org/10.1234/abc".into(),
            resolved_url: "https://x.org/a.pdf".into(),
            target_path: PathBuf::from("a.pdf"),
            metadata: TaskMetadata::default(),
        };
        assert_eq!(task.doi().as_deref(), Some("10.1234/abc"));
        task.metadata.doi = Some("10.9999/meta".into());
        assert_eq!(task.doi().as_deref(), Some("10.9999/meta"));
    }

    #[test]
    fn test_outcome_filename_only_on_success() {
        let task = DownloadTask {
            id: "1".into(),
            source_url: "https://x.org".into(),
            resolved_url: "https://x.org/a.pdf".into(),
            target_path: PathBuf::from("/out/2020_Doe.pdf"),
            metadata: TaskMetadata::default(),
        };
        let failed = DownloadOutcome::failed(task.clone(), "x".into(), 1, false);
        assert_eq!(failed.filename(), None);
        let ok = DownloadOutcome {
            success: true,
            error: None,
            ..failed
        };
        assert_eq!(ok.filename().as_deref(), Some("2020_Doe.pdf"));
    }
}
