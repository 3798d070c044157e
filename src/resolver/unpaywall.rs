//! Unpaywall open-access lookup used as the download fallback.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::http_client::api_get;
use super::{OpenAccessLookup, ResolveError};
use crate::download::{HttpClient, RateLimiter};

const DEFAULT_BASE_URL: &str = "https://api.unpaywall.org";

#[derive(Debug, Deserialize)]
pub(crate) struct UnpaywallResponse {
    #[serde(default)]
    pub is_oa: bool,
    pub best_oa_location: Option<OaLocation>,
    #[serde(default)]
    pub oa_locations: Vec<OaLocation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OaLocation {
    pub url_for_pdf: Option<String>,
}

impl UnpaywallResponse {
    /// Best location's PDF, else the first listed location that has one.
    fn pdf_url(&self) -> Option<String> {
        if !self.is_oa {
            return None;
        }
        self.best_oa_location
            .iter()
            .chain(self.oa_locations.iter())
            .filter_map(|location| location.url_for_pdf.as_deref())
            .map(str::trim)
            .find(|url| !url.is_empty())
            .map(str::to_string)
    }
}

/// Client for `GET /v2/<doi>?email=<contact>`.
pub struct UnpaywallClient {
    client: HttpClient,
    limiter: Arc<RateLimiter>,
    base_url: String,
    email: String,
}

impl UnpaywallClient {
    #[must_use]
    pub fn new(client: HttpClient, email: impl Into<String>) -> Self {
        Self::with_base_url(client, email, DEFAULT_BASE_URL)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(
        client: HttpClient,
        email: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            limiter: Arc::new(RateLimiter::disabled()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            email: email.into(),
        }
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }
}

impl std::fmt::Debug for UnpaywallClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnpaywallClient")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl OpenAccessLookup for UnpaywallClient {
    #[instrument(skip(self), fields(resolver = "unpaywall"))]
    async fn find_pdf(&self, doi: &str) -> Result<Option<String>, ResolveError> {
        let url = format!(
            "{}/v2/{}?email={}",
            self.base_url,
            doi.trim(),
            urlencoding::encode(self.email.trim())
        );
        self.limiter.acquire(&url).await;
        let response = api_get(&self.client, &url)
            .send()
            .await
            .map_err(|e| ResolveError::open_access(doi, e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            debug!(doi, "DOI unknown to Unpaywall");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ResolveError::open_access(
                doi,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body = response
            .json::<UnpaywallResponse>()
            .await
            .map_err(|e| ResolveError::open_access(doi, format!("invalid response: {e}")))?;
        let pdf = body.pdf_url();
        debug!(doi, is_oa = body.is_oa, found = pdf.is_some(), "Unpaywall lookup finished");
        Ok(pdf)
    }
}
