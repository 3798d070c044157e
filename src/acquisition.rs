//! End-to-end acquisition runs.
//!
//! An input file (URL list or CSV/TSV table) is parsed, every entry is
//! resolved to a PDF location, target paths are reserved sequentially so
//! they stay unique, and the resolvable entries go through the
//! [`DownloadEngine`]. Every entry, resolvable or not, ends up as one row of
//! the download report, in input order.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::download::filename::reserve_unique_path;
use crate::download::{
    DEFAULT_CONCURRENCY, DEFAULT_PER_HOST_CONCURRENCY, DownloadEngine, DownloadOutcome,
    DownloadStats, DownloadTask, EngineError, HttpClient, RateLimiter, RetryPolicy, TaskMetadata,
};
use crate::parser::{
    InputKind, PaperRow, PaperTable, ParseError, read_table, read_url_list, validate_url,
};
use crate::report::{DownloadReportRow, write_table_report, write_url_report};
use crate::resolver::doi::{doi_to_url, normalize_doi};
use crate::resolver::{
    CrossrefSearch, DoiSearch, PageResolver, ResolveError, ResolvedPdf, UnpaywallClient,
    is_problematic_url,
};

/// Pages resolved at once before downloading starts.
const RESOLVE_CONCURRENCY: usize = 8;

/// Contact address sent to Crossref and Unpaywall when none is configured.
pub const DEFAULT_MAILTO: &str = "sift@example.com";

/// Errors that abort an acquisition run. Per-entry failures never surface
/// here; they become report rows.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The input file could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Concurrency limits are out of range.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The output directory could not be created.
    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        /// Directory path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The download report could not be written.
    #[error("cannot write download report {path}: {source}")]
    Report {
        /// Report path.
        path: PathBuf,
        /// The CSV writer error.
        #[source]
        source: csv::Error,
    },
}

/// Settings for one acquisition run.
#[derive(Debug, Clone)]
pub struct AcquisitionOptions {
    /// Where PDFs go; the input file's directory when `None`.
    pub output_dir: Option<PathBuf>,
    pub concurrency: usize,
    pub per_host: usize,
    pub retry_policy: RetryPolicy,
    /// Contact address for the Crossref and Unpaywall polite pools.
    pub mailto: String,
    /// Minimum interval between page or metadata requests to one domain.
    pub rate_limit: Duration,
    /// Crossref API base URL override.
    pub crossref_base_url: Option<String>,
    /// Unpaywall API base URL override.
    pub unpaywall_base_url: Option<String>,
    /// DOI resolver prefix override (default `https://doi.org/`).
    pub doi_resolver: Option<String>,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            output_dir: None,
            concurrency: DEFAULT_CONCURRENCY,
            per_host: DEFAULT_PER_HOST_CONCURRENCY,
            retry_policy: RetryPolicy::default(),
            mailto: DEFAULT_MAILTO.to_string(),
            rate_limit: Duration::ZERO,
            crossref_base_url: None,
            unpaywall_base_url: None,
            doi_resolver: None,
        }
    }
}

/// Counts and report location of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionSummary {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub report_path: PathBuf,
}

/// Report path for `input`: `<stem>_download.csv` for URL lists,
/// `<stem>_download<ext>` for tables.
#[must_use]
pub fn report_path(input: &Path, kind: InputKind) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let ext = match kind {
        InputKind::UrlList => "csv".to_string(),
        InputKind::Table => input
            .extension()
            .map_or_else(|| "csv".to_string(), |e| e.to_string_lossy().into_owned()),
    };
    input.with_file_name(format!("{stem}_download.{ext}"))
}

/// Collapses whitespace runs so a reason fits one report cell line.
fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reason recorded for an entry that could not be resolved.
fn resolve_failure_reason(error: &ResolveError) -> String {
    match error {
        ResolveError::NoPdfFound { .. } => "No PDF found".to_string(),
        other => one_line(&format!("Error: {other}")),
    }
}

// ==================== Planning ====================

/// One input entry on its way to a report row.
#[derive(Debug)]
enum Planned {
    Failed(String),
    Ready(DownloadTask),
}

struct Prepared {
    locator: String,
    filename_hint: Option<String>,
    metadata: TaskMetadata,
}

/// Builds resolvers and the engine once per run.
pub struct Acquisition {
    options: AcquisitionOptions,
    client: HttpClient,
    pages: PageResolver,
    search: Arc<dyn DoiSearch>,
    engine: DownloadEngine,
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("options", &self.options)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Acquisition {
    /// Wires the page resolver, Crossref search and Unpaywall fallback to
    /// the shared client.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Engine`] when concurrency limits are out
    /// of range.
    pub fn new(options: AcquisitionOptions, client: HttpClient) -> Result<Self, AcquisitionError> {
        let limiter = Arc::new(if options.rate_limit.is_zero() {
            RateLimiter::disabled()
        } else {
            RateLimiter::new(options.rate_limit)
        });

        let mut pages = PageResolver::new(client.clone()).with_rate_limiter(Arc::clone(&limiter));
        if let Some(resolver) = &options.doi_resolver {
            pages = pages.with_doi_resolver(resolver.clone());
        }

        let search = match &options.crossref_base_url {
            Some(base) => CrossrefSearch::with_base_url(client.clone(), &options.mailto, base),
            None => CrossrefSearch::new(client.clone(), &options.mailto),
        }
        .with_rate_limiter(Arc::clone(&limiter));

        let unpaywall = match &options.unpaywall_base_url {
            Some(base) => UnpaywallClient::with_base_url(client.clone(), &options.mailto, base),
            None => UnpaywallClient::new(client.clone(), &options.mailto),
        }
        .with_rate_limiter(limiter);

        let engine = DownloadEngine::new(
            options.concurrency,
            options.per_host,
            options.retry_policy.clone(),
        )?
        .with_open_access(Arc::new(unpaywall));

        Ok(Self {
            options,
            client,
            pages,
            search: Arc::new(search),
            engine,
        })
    }

    /// Live download counters, for progress display.
    #[must_use]
    pub fn stats(&self) -> Arc<DownloadStats> {
        self.engine.stats()
    }

    /// Acquires every entry of `input` and writes its download report.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError`] when the input cannot be parsed or the
    /// output directory or report cannot be written.
    #[instrument(skip(self), fields(input = %input.display()))]
    pub async fn run(&self, input: &Path) -> Result<AcquisitionSummary, AcquisitionError> {
        let kind = InputKind::from_path(input);
        let output_dir = self.output_dir(input)?;
        let report = report_path(input, kind);

        let (total, downloaded) = match kind {
            InputKind::UrlList => {
                let urls = read_url_list(input)?;
                let rows = self.acquire_urls(&urls, &output_dir).await;
                write_url_report(&report, &rows).map_err(|source| AcquisitionError::Report {
                    path: report.clone(),
                    source,
                })?;
                (rows.len(), rows.iter().filter(|(_, r)| r.downloaded).count())
            }
            InputKind::Table => {
                let table = read_table(input)?;
                let rows = self.acquire_table(&table, &output_dir).await;
                write_table_report(&report, table.delimiter, &table.headers, &rows).map_err(
                    |source| AcquisitionError::Report {
                        path: report.clone(),
                        source,
                    },
                )?;
                (rows.len(), rows.iter().filter(|(_, r)| r.downloaded).count())
            }
        };

        let summary = AcquisitionSummary {
            total,
            downloaded,
            failed: total - downloaded,
            report_path: report,
        };
        info!(
            total = summary.total,
            downloaded = summary.downloaded,
            failed = summary.failed,
            report = %summary.report_path.display(),
            "acquisition complete"
        );
        Ok(summary)
    }

    fn output_dir(&self, input: &Path) -> Result<PathBuf, AcquisitionError> {
        let dir = self.options.output_dir.clone().unwrap_or_else(|| {
            input
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        });
        std::fs::create_dir_all(&dir).map_err(|source| AcquisitionError::OutputDir {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    async fn acquire_urls(
        &self,
        urls: &[String],
        output_dir: &Path,
    ) -> Vec<(String, DownloadReportRow)> {
        let prepared = urls
            .iter()
            .map(|url| match validate_url(url) {
                Ok(_) => Ok(Prepared {
                    locator: url.clone(),
                    filename_hint: None,
                    metadata: TaskMetadata::default(),
                }),
                Err(e) => Err(one_line(&format!("Error: {e}"))),
            })
            .collect::<Vec<_>>();
        let outcomes = self.resolve_and_download(prepared, output_dir).await;
        urls.iter().cloned().zip(outcomes).collect()
    }

    async fn acquire_table(
        &self,
        table: &PaperTable,
        output_dir: &Path,
    ) -> Vec<(Vec<String>, DownloadReportRow)> {
        let mut prepared = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            prepared.push(self.prepare_row(row).await);
        }
        let outcomes = self.resolve_and_download(prepared, output_dir).await;
        table
            .rows
            .iter()
            .map(|row| row.cells.clone())
            .zip(outcomes)
            .collect()
    }

    /// Picks the locator for a table row.
    ///
    /// Aggregator pages are replaced by the row's DOI, or by a DOI found
    /// through bibliographic search, before anything is fetched.
    async fn prepare_row(&self, row: &PaperRow) -> Result<Prepared, String> {
        let mut metadata = row.metadata();
        let locator = match row.url.as_deref() {
            Some(url) if is_problematic_url(url) => {
                info!(row = %row.id, url, "URL needs a browser, looking for a DOI instead");
                match self.substitute_doi(row).await {
                    Some((doi, doi_url)) => {
                        metadata.doi = Some(doi);
                        Some(doi_url)
                    }
                    None => {
                        info!(row = %row.id, "no DOI found, trying the original URL");
                        Some(url.to_string())
                    }
                }
            }
            Some(url) => Some(url.to_string()),
            None => row.doi.as_deref().and_then(|doi| self.doi_locator(doi)),
        };

        let Some(locator) = locator else {
            warn!(row = %row.id, title = row.title.as_deref().unwrap_or_default(), "no URL available");
            return Err("No URL available".to_string());
        };
        Ok(Prepared {
            locator,
            filename_hint: Some(row.filename()),
            metadata,
        })
    }

    /// URL for a DOI column value, routed through the configured resolver.
    fn doi_locator(&self, value: &str) -> Option<String> {
        let url = doi_to_url(value)?;
        Some(normalize_doi(&url).map_or(url, |doi| self.pages.doi_url(&doi)))
    }

    async fn substitute_doi(&self, row: &PaperRow) -> Option<(String, String)> {
        if let Some(doi) = row.doi.as_deref()
            && let Some(url) = self.doi_locator(doi)
        {
            debug!(row = %row.id, doi, "using the row's DOI");
            return Some((doi.trim().to_string(), url));
        }
        let title = row.title.as_deref()?;
        match self
            .search
            .search(title, row.authors.as_deref(), row.year.as_deref())
            .await
        {
            Ok(Some(doi)) => {
                info!(row = %row.id, doi = %doi, "found DOI through bibliographic search");
                self.doi_locator(&doi).map(|url| (doi, url))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(row = %row.id, error = %e, "bibliographic search failed");
                None
            }
        }
    }

    /// Resolves, reserves paths, downloads. One report row per entry, in order.
    async fn resolve_and_download(
        &self,
        prepared: Vec<Result<Prepared, String>>,
        output_dir: &Path,
    ) -> Vec<DownloadReportRow> {
        let resolved: Vec<Result<(Prepared, ResolvedPdf), String>> = stream::iter(prepared)
            .map(|entry| async move {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(reason) => return Err(reason),
                };
                match self.pages.resolve(&entry.locator).await {
                    Ok(pdf) => Ok((entry, pdf)),
                    Err(e) => {
                        warn!(url = %entry.locator, error = %e, "resolution failed");
                        Err(resolve_failure_reason(&e))
                    }
                }
            })
            .buffered(RESOLVE_CONCURRENCY)
            .collect()
            .await;

        let mut reserved = HashSet::new();
        let planned: Vec<Planned> = resolved
            .into_iter()
            .enumerate()
            .map(|(index, entry)| match entry {
                Ok((prepared, pdf)) => {
                    let filename = prepared.filename_hint.unwrap_or(pdf.filename);
                    let mut metadata = prepared.metadata;
                    if metadata.doi.is_none() {
                        metadata.doi = pdf.doi;
                    }
                    Planned::Ready(DownloadTask {
                        id: index.to_string(),
                        source_url: prepared.locator,
                        resolved_url: pdf.pdf_url,
                        target_path: reserve_unique_path(output_dir, &filename, &mut reserved),
                        metadata,
                    })
                }
                Err(reason) => Planned::Failed(reason),
            })
            .collect();

        let tasks: Vec<DownloadTask> = planned
            .iter()
            .filter_map(|p| match p {
                Planned::Ready(task) => Some(task.clone()),
                Planned::Failed(_) => None,
            })
            .collect();
        info!(
            entries = planned.len(),
            tasks = tasks.len(),
            concurrency = self.engine.concurrency(),
            per_host = self.engine.per_host(),
            "starting downloads"
        );

        let mut outcomes: HashMap<String, DownloadOutcome> = self
            .engine
            .run(tasks, &self.client)
            .await
            .into_iter()
            .map(|o| (o.task.id.clone(), o))
            .collect();

        planned
            .into_iter()
            .map(|p| match p {
                Planned::Failed(reason) => DownloadReportRow::failure(reason),
                Planned::Ready(task) => match outcomes.remove(&task.id) {
                    Some(outcome) => report_row(&outcome),
                    None => DownloadReportRow::failure("Download failed: no result"),
                },
            })
            .collect()
    }
}

fn report_row(outcome: &DownloadOutcome) -> DownloadReportRow {
    match outcome.filename() {
        Some(name) => DownloadReportRow::success(name),
        None => DownloadReportRow::failure(
            outcome
                .error
                .as_deref()
                .map_or_else(|| "Download failed".to_string(), one_line),
        ),
    }
}

/// Acquires every entry of `path` with a fresh engine.
///
/// # Errors
///
/// Returns [`AcquisitionError`] when the run cannot start or its report
/// cannot be written.
pub async fn acquire_file(
    path: &Path,
    options: &AcquisitionOptions,
    client: &HttpClient,
) -> Result<AcquisitionSummary, AcquisitionError> {
    Acquisition::new(options.clone(), client.clone())?
        .run(path)
        .await
}
