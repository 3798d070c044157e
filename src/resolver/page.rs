//! Landing-page resolution: turns an article URL into a concrete PDF URL.
//!
//! Resolution is an explicit loop rather than recursion. Each iteration
//! either short-circuits on a direct PDF, finds a link on the fetched page,
//! or hops to the page's DOI. DOI hops are bounded by a depth limit and a
//! per-chain visited set.

use std::collections::HashSet;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use super::ResolveError;
use super::doi::{DOI_RESOLVER, doi_key, find_doi_in_text, is_doi_url, normalize_doi};
use super::http_client::{FetchedPage, fetch_page};
use super::publisher::publisher_for;
use super::utils::{absolutize_url, canonical_host};
use crate::download::filename::{ensure_pdf_extension, filename_from_url, parse_content_disposition};
use crate::download::{HttpClient, RateLimiter};

/// Maximum number of DOI hops in one resolution chain.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Filename used when nothing better is known.
const FALLBACK_FILENAME: &str = "downloaded.pdf";

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPdf {
    /// URL the PDF can be downloaded from.
    pub pdf_url: String,
    /// Suggested filename, always ending in `.pdf`.
    pub filename: String,
    /// DOI seen along the chain, if any.
    pub doi: Option<String>,
    /// True when the input URL (or its response) already was the PDF.
    pub direct: bool,
}

/// Resolves article URLs to PDF URLs through the shared HTTP client.
#[derive(Debug, Clone)]
pub struct PageResolver {
    client: HttpClient,
    limiter: Arc<RateLimiter>,
    max_depth: usize,
    doi_resolver: String,
}

impl PageResolver {
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            limiter: Arc::new(RateLimiter::disabled()),
            max_depth: DEFAULT_MAX_DEPTH,
            doi_resolver: DOI_RESOLVER.to_string(),
        }
    }

    /// Paces page fetches per domain.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Overrides the `https://doi.org/` prefix DOIs are followed through.
    #[must_use]
    pub fn with_doi_resolver(mut self, base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        self.doi_resolver = base;
        self
    }

    /// URL a DOI is followed through.
    #[must_use]
    pub fn doi_url(&self, doi: &str) -> String {
        format!("{}{}", self.doi_resolver, doi.trim())
    }

    /// Resolves `url` to a PDF location.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::Fetch`] when a page cannot be fetched
    /// - [`ResolveError::NoPdfFound`] when no strategy finds a link and no
    ///   unvisited DOI remains
    /// - [`ResolveError::DepthExceeded`] when the DOI chain is too long
    pub async fn resolve(&self, url: &str) -> Result<ResolvedPdf, ResolveError> {
        let mut visited = HashSet::new();
        self.resolve_with_visited(url, &mut visited).await
    }

    /// Resolves `url`, sharing a visited-DOI set with the caller.
    #[instrument(skip(self, visited), fields(resolver = "page"))]
    pub async fn resolve_with_visited(
        &self,
        url: &str,
        visited: &mut HashSet<String>,
    ) -> Result<ResolvedPdf, ResolveError> {
        let mut current = url.trim().to_string();
        let mut chain_doi = None;
        if is_doi_url(&current) || current.starts_with(&self.doi_resolver) {
            chain_doi = normalize_doi(&current);
            if let Some(key) = chain_doi.as_deref().and_then(doi_key) {
                visited.insert(key);
            }
        }
        let mut depth = 0;

        loop {
            if looks_like_direct_pdf(&current) {
                debug!(url = %current, "URL matches direct-PDF heuristics");
                let filename = filename_from_url(&current)
                    .map(|name| ensure_pdf_extension(&name))
                    .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
                return Ok(ResolvedPdf {
                    pdf_url: current,
                    filename,
                    doi: chain_doi,
                    direct: true,
                });
            }

            let page = fetch_page(&self.client, &self.limiter, &current).await?;
            if page.is_pdf() {
                debug!(url = %page.final_url, "response Content-Type is PDF");
                return Ok(ResolvedPdf {
                    filename: direct_filename(&page),
                    pdf_url: page.final_url,
                    doi: chain_doi,
                    direct: true,
                });
            }

            let base = Url::parse(&page.final_url)
                .map_err(|_| ResolveError::fetch(&page.final_url, "invalid page URL"))?;
            let findings = analyze_page(
                page.body.as_deref().unwrap_or_default(),
                &base,
                chain_doi.as_deref(),
            );

            if let Some(pdf_url) = findings.pdf_link {
                debug!(pdf_url = %pdf_url, strategy = findings.strategy, "PDF link found on page");
                let filename = page_filename(&pdf_url, findings.title.as_deref());
                return Ok(ResolvedPdf {
                    pdf_url,
                    filename,
                    doi: findings.doi.or(chain_doi),
                    direct: false,
                });
            }

            let Some(doi) = findings.doi else {
                return Err(ResolveError::no_pdf_found(page.final_url));
            };
            if !visited.insert(doi.to_lowercase()) {
                debug!(doi = %doi, "DOI already visited in this chain");
                return Err(ResolveError::no_pdf_found(page.final_url));
            }
            if depth >= self.max_depth {
                return Err(ResolveError::DepthExceeded {
                    doi,
                    depth: self.max_depth,
                });
            }
            depth += 1;
            current = self.doi_url(&doi);
            debug!(doi = %doi, depth, next = %current, "following DOI");
            chain_doi.get_or_insert(doi);
        }
    }
}

/// Whether the URL path alone says "this is a PDF".
#[must_use]
pub fn looks_like_direct_pdf(url: &str) -> bool {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    path.contains(".pdf")
        || path.contains("/pdf")
        || path.contains("pdfdirect")
        || path.contains("download/pdf")
}

fn direct_filename(page: &FetchedPage) -> String {
    page.content_disposition
        .as_deref()
        .and_then(parse_content_disposition)
        .or_else(|| filename_from_url(&page.final_url))
        .map(|name| ensure_pdf_extension(&name))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

fn page_filename(pdf_url: &str, title: Option<&str>) -> String {
    filename_from_url(pdf_url)
        .filter(|name| name.to_ascii_lowercase().ends_with(".pdf"))
        .or_else(|| title.map(str::to_string))
        .or_else(|| filename_from_url(pdf_url))
        .map(|name| ensure_pdf_extension(&name))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

/// What a single HTML page offers.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PageFindings {
    pub pdf_link: Option<String>,
    /// Name of the strategy that found `pdf_link`.
    pub strategy: &'static str,
    pub doi: Option<String>,
    pub title: Option<String>,
}

/// Runs every link strategy over `body` and collects the DOI and title.
///
/// Synchronous on purpose: `scraper::Html` is not `Send`.
pub(crate) fn analyze_page(body: &str, base: &Url, known_doi: Option<&str>) -> PageFindings {
    let document = Html::parse_document(body);
    let doi = meta_doi(&document).or_else(|| find_doi_in_text(body));
    let title = select_first(&document, "title")
        .map(|el| el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty());
    let host = base.host_str().map(canonical_host).unwrap_or_default();

    let strategies: [(&'static str, Option<String>); 5] = [
        ("meta", meta_pdf_link(&document, base)),
        (
            "publisher",
            publisher_link(&document, base, &host, doi.as_deref().or(known_doi)),
        ),
        ("pdf_href", anchor_ending_in_pdf(&document, base)),
        ("pdf_text", anchor_mentioning_pdf(&document, base)),
        ("download_attr", download_styled_link(&document, base)),
    ];
    let (strategy, pdf_link) = strategies
        .into_iter()
        .find_map(|(name, link)| link.map(|l| (name, Some(l))))
        .unwrap_or(("", None));

    PageFindings {
        pdf_link,
        strategy,
        doi,
        title,
    }
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

fn metas<'a>(document: &'a Html) -> impl Iterator<Item = (String, &'a str)> + 'a {
    let selector = Selector::parse("meta").ok();
    selector
        .into_iter()
        .flat_map(move |sel| document.select(&sel).collect::<Vec<_>>())
        .filter_map(|el| {
            let name = el.value().attr("name").or_else(|| el.value().attr("property"))?;
            let content = el.value().attr("content")?;
            Some((name.trim().to_ascii_lowercase(), content))
        })
}

fn meta_pdf_link(document: &Html, base: &Url) -> Option<String> {
    metas(document)
        .filter(|(name, _)| name == "citation_pdf_url" || name == "fulltext_pdf_url")
        .find_map(|(_, content)| absolutize_url(content, base))
}

fn meta_doi(document: &Html) -> Option<String> {
    const DOI_METAS: [&str; 4] = ["citation_doi", "dc.identifier", "prism.doi", "bepress_citation_doi"];
    metas(document)
        .filter(|(name, _)| DOI_METAS.contains(&name.as_str()))
        .find_map(|(_, content)| normalize_doi(content))
}

fn link_of(element: &ElementRef<'_>, base: &Url) -> Option<String> {
    element
        .value()
        .attr("href")
        .or_else(|| element.value().attr("src"))
        .and_then(|value| absolutize_url(value, base))
}

fn publisher_link(document: &Html, base: &Url, host: &str, doi: Option<&str>) -> Option<String> {
    let rule = publisher_for(host, doi)?;
    let link = rule.selectors.iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        document
            .select(&selector)
            .find_map(|element| link_of(&element, base))
    });
    if let Some(link) = &link {
        debug!(publisher = rule.name, %link, "publisher selector matched");
    }
    link
}

fn anchors<'a>(document: &'a Html) -> Vec<ElementRef<'a>> {
    Selector::parse("a[href]")
        .ok()
        .map(|sel| document.select(&sel).collect())
        .unwrap_or_default()
}

fn anchor_ending_in_pdf(document: &Html, base: &Url) -> Option<String> {
    anchors(document).into_iter().find_map(|a| {
        let href = a.value().attr("href")?;
        let path = href.split(['?', '#']).next().unwrap_or_default();
        if path.to_ascii_lowercase().ends_with(".pdf") {
            absolutize_url(href, base)
        } else {
            None
        }
    })
}

fn anchor_mentioning_pdf(document: &Html, base: &Url) -> Option<String> {
    anchors(document).into_iter().find_map(|a| {
        let href = a.value().attr("href")?.to_ascii_lowercase();
        let text = a.text().collect::<String>().to_lowercase();
        if ["cover", "sample"]
            .iter()
            .any(|bad| href.contains(bad) || text.contains(bad))
        {
            return None;
        }
        let mentions_pdf = href.contains("pdf") || text.contains("pdf");
        let full_text_download = text.contains("download") && text.contains("full text");
        if mentions_pdf || full_text_download {
            link_of(&a, base)
        } else {
            None
        }
    })
}

fn download_styled_link(document: &Html, base: &Url) -> Option<String> {
    ["[download]", ".download-pdf", ".pdf-download", ".pdf-link"]
        .iter()
        .find_map(|css| {
            let selector = Selector::parse(css).ok()?;
            document
                .select(&selector)
                .find_map(|element| link_of(&element, base))
        })
}
