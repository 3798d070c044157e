//! Sift Core Library
//!
//! This library screens bibliographic records for systematic reviews and
//! acquires full-text PDFs for the records that survive screening.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`record`] - In-memory manuscript records with tag/inclusion state
//! - [`screening`] - Configuration, input loading, filter stages, orchestrator
//! - [`classify`] - Optional AI classification capability used by filters
//! - [`parser`] - Acquisition inputs (URL lists, CSV/TSV tables)
//! - [`resolver`] - PDF link discovery, DOI search, open-access lookup
//! - [`download`] - Concurrent downloader with per-host limits and retry
//! - [`acquisition`] - End-to-end acquisition runs producing download reports
//! - [`report`] - Screening and download report writers
//! - [`zotero`] - Zotero collection attachment download

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acquisition;
pub mod classify;
pub mod download;
pub mod parser;
pub mod record;
pub mod report;
pub mod resolver;
pub mod screening;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;
pub mod zotero;

// Re-export commonly used types
pub use acquisition::{AcquisitionOptions, AcquisitionSummary, acquire_file};
pub use classify::{ChatClassifier, ClassifyError, Classifier};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_PER_HOST_CONCURRENCY, DownloadEngine,
    DownloadError, DownloadOutcome, DownloadStats, DownloadTask, EngineError, FailureType, HttpClient,
    RateLimiter, RetryDecision, RetryPolicy, TaskMetadata, classify_error,
};
pub use parser::{ColumnMap, ParseError, PaperRow, PaperTable, parse_table, parse_url_list};
pub use record::{ManuscriptRecord, TagValue};
pub use resolver::{
    CrossrefSearch, DoiSearch, OpenAccessLookup, PageResolver, ResolveError, ResolvedPdf,
    UnpaywallClient,
};
pub use screening::{
    ConfigError, LlmConfig, ScreeningConfig, ScreeningError, ScreeningResult, load_config,
    load_records, screen,
};
pub use zotero::{ParentKey, ZoteroClient, ZoteroError};
