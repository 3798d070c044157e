//! Crossref bibliographic search: title, authors and year to a best-match DOI.
//!
//! Used as the last resolver step for records that only carry a
//! browser-only aggregator URL. Matches below [`MIN_MATCH_SCORE`] are ignored.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::http_client::api_get;
use super::{DoiSearch, ResolveError};
use crate::download::{HttpClient, RateLimiter};

/// Default Crossref API base URL.
const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

/// Lowest Crossref relevance score accepted as a match.
pub const MIN_MATCH_SCORE: f64 = 50.0;

// ==================== Crossref API Response Types ====================

/// Top-level Crossref `/works` search response.
#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefResponse {
    pub status: String,
    pub message: CrossrefMessage,
}

/// The `message` field of a search response.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CrossrefMessage {
    #[serde(default)]
    pub items: Vec<CrossrefItem>,
}

/// One ranked search hit.
#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefItem {
    /// The DOI field is uppercase in the Crossref response.
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    pub score: Option<f64>,
    pub title: Option<Vec<String>>,
}

// ==================== CrossrefSearch ====================

/// Looks up DOIs through the Crossref REST API polite pool.
///
/// Every request carries a `mailto` query parameter so Crossref can contact
/// the operator instead of blocking the client.
pub struct CrossrefSearch {
    client: HttpClient,
    limiter: Arc<RateLimiter>,
    base_url: String,
    mailto: String,
}

impl CrossrefSearch {
    /// Creates a search client against the public Crossref API.
    #[must_use]
    pub fn new(client: HttpClient, mailto: impl Into<String>) -> Self {
        Self::with_base_url(client, mailto, DEFAULT_BASE_URL)
    }

    /// Creates a search client with a custom base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(
        client: HttpClient,
        mailto: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            limiter: Arc::new(RateLimiter::disabled()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mailto: mailto.into(),
        }
    }

    /// Paces requests through a shared per-domain limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    fn query_url(&self, query: &str) -> String {
        let mut url = format!(
            "{}/works?query.bibliographic={}&rows=1",
            self.base_url,
            urlencoding::encode(query)
        );
        if !self.mailto.trim().is_empty() {
            url.push_str("&mailto=");
            url.push_str(&urlencoding::encode(self.mailto.trim()));
        }
        url
    }
}

impl std::fmt::Debug for CrossrefSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossrefSearch")
            .field("base_url", &self.base_url)
            .field("mailto", &self.mailto)
            .finish_non_exhaustive()
    }
}

/// Joins the non-empty search terms with spaces.
fn bibliographic_query(title: &str, authors: Option<&str>, year: Option<&str>) -> String {
    [Some(title), authors, year]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// DOI of the top hit when its score clears [`MIN_MATCH_SCORE`].
fn accepted_doi(response: &CrossrefResponse) -> Option<String> {
    let item = response.message.items.first()?;
    let score = item.score.unwrap_or(0.0);
    if score < MIN_MATCH_SCORE {
        debug!(score, "Crossref top hit below minimum score");
        return None;
    }
    item.doi
        .as_deref()
        .map(str::trim)
        .filter(|doi| !doi.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl DoiSearch for CrossrefSearch {
    #[instrument(skip(self, authors, year), fields(resolver = "crossref"))]
    async fn search(
        &self,
        title: &str,
        authors: Option<&str>,
        year: Option<&str>,
    ) -> Result<Option<String>, ResolveError> {
        if title.trim().is_empty() {
            return Ok(None);
        }
        let url = self.query_url(&bibliographic_query(title, authors, year));
        debug!(api_url = %url, "Calling Crossref search");

        self.limiter.acquire(&url).await;
        let response = api_get(&self.client, &url).send().await.map_err(|e| {
            warn!(error = %e, "Crossref request failed");
            ResolveError::search("cannot reach Crossref API")
        })?;

        let status = response.status();
        if !status.is_success() {
            let reason = match status.as_u16() {
                429 => "Crossref rate limit exceeded".to_string(),
                s if s >= 500 => "Crossref API unavailable".to_string(),
                s => format!("Crossref API returned HTTP {s}"),
            };
            return Err(ResolveError::search(reason));
        }

        let body = response.json::<CrossrefResponse>().await.map_err(|e| {
            warn!(error = %e, "Failed to parse Crossref response JSON");
            ResolveError::search("unexpected Crossref response format")
        })?;
        if !body.status.eq_ignore_ascii_case("ok") {
            return Err(ResolveError::search(format!(
                "unexpected Crossref status '{}'",
                body.status
            )));
        }

        let doi = accepted_doi(&body);
        if let Some(doi) = &doi {
            let matched = body
                .message
                .items
                .first()
                .and_then(|item| item.title.as_ref())
                .and_then(|titles| titles.first())
                .map(String::as_str)
                .unwrap_or_default();
            debug!(doi = %doi, matched_title = matched, "Crossref match accepted");
        }
        Ok(doi)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    fn response(score: f64) -> serde_json::Value {
        serde_json::json!({
            "status": "ok",
            "message": {
                "items": [{
                    "DOI": "10.1234/found",
                    "score": score,
                    "title": ["Reading Interventions in Primary School"]
                }]
            }
        })
    }

    #[test]
    fn test_bibliographic_query_skips_empty_parts() {
        assert_eq!(
            bibliographic_query("A Title", Some(" "), Some("2020")),
            "A Title 2020"
        );
        assert_eq!(bibliographic_query("A Title", None, None), "A Title");
    }

    #[test]
    fn test_accepted_doi_respects_minimum_score() {
        let high: CrossrefResponse = serde_json::from_value(response(72.5)).unwrap();
        assert_eq!(accepted_doi(&high).as_deref(), Some("10.1234/found"));

        let low: CrossrefResponse = serde_json::from_value(response(49.9)).unwrap();
        assert_eq!(accepted_doi(&low), None);

        let empty: CrossrefResponse =
            serde_json::from_value(serde_json::json!({"status": "ok", "message": {}})).unwrap();
        assert_eq!(accepted_doi(&empty), None);
    }

    #[tokio::test]
    async fn test_search_sends_polite_query_and_accepts_match() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("rows", "1"))
            .and(query_param("mailto", "team@example.org"))
            .and(query_param(
                "query.bibliographic",
                "Reading Interventions Smith 2021",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(response(88.0)))
            .expect(1)
            .mount(&server)
            .await;

        let search = CrossrefSearch::with_base_url(
            HttpClient::new().unwrap(),
            "team@example.org",
            server.uri(),
        );
        let doi = search
            .search("Reading Interventions", Some("Smith"), Some("2021"))
            .await
            .unwrap();
        assert_eq!(doi.as_deref(), Some("10.1234/found"));
    }

    #[tokio::test]
    async fn test_search_low_score_is_no_match() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response(12.0)))
            .mount(&server)
            .await;
        let search = CrossrefSearch::with_base_url(HttpClient::new().unwrap(), "", server.uri());
        assert_eq!(search.search("Anything", None, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_search_server_error_maps_to_search_error() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let search = CrossrefSearch::with_base_url(HttpClient::new().unwrap(), "", server.uri());
        let err = search.search("Anything", None, None).await.unwrap_err();
        assert!(matches!(err, ResolveError::Search { .. }));
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_search_empty_title_skips_request() {
        let search = CrossrefSearch::with_base_url(
            HttpClient::new().unwrap(),
            "",
            "http://127.0.0.1:9",
        );
        assert_eq!(search.search("  ", Some("Smith"), None).await.unwrap(), None);
    }
}
