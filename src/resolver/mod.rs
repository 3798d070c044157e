//! PDF discovery for acquisition.
//!
//! # Architecture
//!
//! - [`PageResolver`] - direct-PDF heuristics, landing-page strategies,
//!   bounded DOI chain following
//! - [`DoiSearch`] / [`CrossrefSearch`] - bibliographic search for records
//!   that only carry an aggregator URL
//! - [`OpenAccessLookup`] / [`UnpaywallClient`] - open-access copy for a DOI,
//!   used by the download engine as its fallback
//! - [`doi`] - DOI grammar, normalization, DOI-to-URL conversion
//!
//! Every client takes the shared [`crate::download::HttpClient`]; nothing
//! here builds its own transport.

pub mod crossref;
pub mod doi;
mod error;
mod http_client;
pub mod page;
mod publisher;
pub mod unpaywall;
pub mod utils;

use async_trait::async_trait;

pub use crossref::CrossrefSearch;
pub use error::ResolveError;
pub use page::{PageResolver, ResolvedPdf};
pub use unpaywall::UnpaywallClient;

/// Hosts that only serve browser-rendered detail pages, never PDFs.
const PROBLEMATIC_HOSTS: [&str; 4] = [
    "dimensions.ai",
    "researchgate.net",
    "academia.edu",
    "semanticscholar.org",
];

/// Finds a DOI from bibliographic metadata.
#[async_trait]
pub trait DoiSearch: Send + Sync {
    /// Best-match DOI for the given title, or `None` when nothing matches well enough.
    async fn search(
        &self,
        title: &str,
        authors: Option<&str>,
        year: Option<&str>,
    ) -> Result<Option<String>, ResolveError>;
}

/// Finds an open-access PDF for a DOI.
#[async_trait]
pub trait OpenAccessLookup: Send + Sync {
    /// PDF URL of an open-access copy, or `None` when there is none.
    async fn find_pdf(&self, doi: &str) -> Result<Option<String>, ResolveError>;
}

/// True for aggregator detail pages that must not be fetched directly.
///
/// Semantic Scholar only counts for its `/paper/` pages; its API and PDF
/// hosts are fine.
#[must_use]
pub fn is_problematic_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url.trim()) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    PROBLEMATIC_HOSTS.iter().any(|domain| {
        utils::host_matches(host, domain)
            && (*domain != "semanticscholar.org" || parsed.path().starts_with("/paper/"))
    })
}
