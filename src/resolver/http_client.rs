//! Page and API fetch policy for resolvers.
//!
//! All resolver traffic goes through the injected [`HttpClient`] with a
//! per-request timeout of [`PAGE_TIMEOUT_SECS`] and per-domain pacing.

use std::time::Duration;

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use tracing::debug;

use super::ResolveError;
use crate::download::constants::PAGE_TIMEOUT_SECS;
use crate::download::{HttpClient, RateLimiter};

/// A fetched landing page, or the headers of a direct PDF response.
#[derive(Debug, Clone)]
pub(crate) struct FetchedPage {
    /// URL after redirects.
    pub final_url: String,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    /// HTML body; `None` when the response is a PDF.
    pub body: Option<String>,
}

impl FetchedPage {
    /// Whether the response itself is a PDF download.
    pub fn is_pdf(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(is_pdf_content_type)
    }
}

/// `application/pdf` or `application/octet-stream`, ignoring parameters.
pub(crate) fn is_pdf_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/pdf" || mime == "application/octet-stream"
}

/// Builds a GET request with the resolver timeout.
pub(crate) fn api_get(client: &HttpClient, url: &str) -> reqwest::RequestBuilder {
    client
        .inner()
        .get(url)
        .timeout(Duration::from_secs(PAGE_TIMEOUT_SECS))
}

/// Fetches `url`; PDF responses are not read past their headers.
///
/// # Errors
///
/// Returns [`ResolveError::Fetch`] on transport failures and non-success statuses.
pub(crate) async fn fetch_page(
    client: &HttpClient,
    limiter: &RateLimiter,
    url: &str,
) -> Result<FetchedPage, ResolveError> {
    limiter.acquire(url).await;
    let response = api_get(client, url)
        .send()
        .await
        .map_err(|e| ResolveError::fetch(url, describe_transport_error(&e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ResolveError::fetch(url, format!("HTTP {}", status.as_u16())));
    }

    let header = |name| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let content_type = header(CONTENT_TYPE);
    let content_disposition = header(CONTENT_DISPOSITION);
    let final_url = response.url().to_string();

    let mut page = FetchedPage {
        final_url,
        content_type,
        content_disposition,
        body: None,
    };
    if page.is_pdf() {
        debug!(url, "response is a PDF, skipping body");
        return Ok(page);
    }

    let body = response
        .text()
        .await
        .map_err(|e| ResolveError::fetch(url, describe_transport_error(&e)))?;
    page.body = Some(body);
    Ok(page)
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "timed out".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else {
        error.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[test]
    fn test_pdf_content_types() {
        assert!(is_pdf_content_type("application/pdf"));
        assert!(is_pdf_content_type("Application/PDF; charset=binary"));
        assert!(is_pdf_content_type("application/octet-stream"));
        assert!(!is_pdf_content_type("text/html"));
    }

    #[tokio::test]
    async fn test_fetch_page_reads_html_and_skips_pdf_body() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><title>x</title></html>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .insert_header("content-disposition", "attachment; filename=\"a.pdf\"")
                    .set_body_bytes(b"%PDF-1.4".to_vec()),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let limiter = RateLimiter::disabled();
        let html = fetch_page(&client, &limiter, &format!("{}/page", server.uri()))
            .await
            .unwrap();
        assert!(!html.is_pdf());
        assert!(html.body.unwrap().contains("<title>x</title>"));

        let pdf = fetch_page(&client, &limiter, &format!("{}/file", server.uri()))
            .await
            .unwrap();
        assert!(pdf.is_pdf());
        assert!(pdf.body.is_none());
        assert!(pdf.content_disposition.unwrap().contains("a.pdf"));
    }

    #[tokio::test]
    async fn test_fetch_page_maps_status() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let err = fetch_page(
            &HttpClient::new().unwrap(),
            &RateLimiter::disabled(),
            &format!("{}/x", server.uri()),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }
}
