//! Shared HTTP transport and PDF streaming.
//!
//! One [`HttpClient`] is built at startup and passed to the engine, the
//! resolver, and every API client. Cloning is cheap and shares the
//! connection pool.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, DOWNLOAD_TIMEOUT_SECS, MAX_REDIRECTS, PDF_ACCEPT, PDF_SIGNATURE,
    POOL_MAX_IDLE_PER_HOST,
};
use super::error::DownloadError;
use crate::user_agent;

/// Pooled HTTP client shared by downloads and metadata lookups.
///
/// Page and API requests set their own shorter timeout per request;
/// downloads use [`DOWNLOAD_TIMEOUT_SECS`].
///
/// ```no_run
/// use std::path::Path;
/// use sift_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new()?;
/// let bytes = client
///     .download_pdf("https://example.com/paper.pdf", Path::new("./papers/paper.pdf"))
///     .await?;
/// println!("wrote {bytes} bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds the shared client: pooled connections, cookie store, gzip,
    /// bounded redirects, and the project User-Agent.
    ///
    /// # Errors
    ///
    /// Returns the builder error if TLS or system configuration cannot be loaded.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .cookie_store(true)
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an already configured client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// The underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Downloads `url` into `target`, verifying that the body is a PDF.
    ///
    /// Bytes are streamed into `<target>.part`, which is renamed to `target`
    /// on success and removed on any failure.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for bad URLs, transport failures, non-success
    /// statuses, HTML responses, a missing `%PDF` signature, or disk errors.
    #[instrument(skip(self), fields(target = %target.display()))]
    pub async fn download_pdf(&self, url: &str, target: &Path) -> Result<u64, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self.send_download_request(url).await?;
        check_content_type(url, &response)?;

        let part_path = part_path_for(target);
        let written = match stream_pdf(response, url, &part_path).await {
            Ok(written) => written,
            Err(e) => {
                debug!(path = %part_path.display(), "removing partial file");
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part_path, target).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(DownloadError::io(target, e));
        }

        info!(bytes = written, "download complete");
        Ok(written)
    }

    async fn send_download_request(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, PDF_ACCEPT)
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let code = status.as_u16();
        if matches!(code, 401 | 403 | 407) {
            return Err(DownloadError::auth_required(url, code));
        }
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Err(DownloadError::http_status_with_retry_after(
            url,
            code,
            retry_after,
        ))
    }
}

/// Maps a reqwest failure to a timeout or network error.
fn map_transport_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

/// Rejects HTML bodies. A missing or empty Content-Type is allowed.
fn check_content_type(url: &str, response: &reqwest::Response) -> Result<(), DownloadError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if content_type.starts_with("text/html") {
        return Err(DownloadError::validation(
            url,
            format!("unexpected content type {content_type}"),
        ));
    }
    Ok(())
}

fn part_path_for(target: &Path) -> PathBuf {
    let mut name: OsString = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Streams the body into `part_path`, checking the PDF signature on the first bytes.
async fn stream_pdf(
    response: reqwest::Response,
    url: &str,
    part_path: &Path,
) -> Result<u64, DownloadError> {
    let file = File::create(part_path)
        .await
        .map_err(|e| DownloadError::io(part_path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut head: Vec<u8> = Vec::with_capacity(PDF_SIGNATURE.len());
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| map_transport_error(url, e))?;

        if head.len() < PDF_SIGNATURE.len() {
            let needed = (PDF_SIGNATURE.len() - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..needed]);
            if head.len() == PDF_SIGNATURE.len() && head.as_slice() != PDF_SIGNATURE {
                return Err(DownloadError::validation(url, "missing %PDF signature"));
            }
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(part_path, e))?;
        written += chunk.len() as u64;
    }

    if head.len() < PDF_SIGNATURE.len() {
        return Err(DownloadError::validation(url, "missing %PDF signature"));
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(part_path, e))?;
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    const PDF_BODY: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n%%EOF";

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path_for(Path::new("/tmp/a/paper.pdf")),
            PathBuf::from("/tmp/a/paper.pdf.part")
        );
    }

    #[tokio::test]
    async fn test_download_pdf_writes_file_and_sends_accept() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/paper.pdf"))
            .and(header("accept", PDF_ACCEPT))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(PDF_BODY),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("paper.pdf");
        let client = HttpClient::new().unwrap();
        let bytes = client
            .download_pdf(&format!("{}/paper.pdf", server.uri()), &target)
            .await
            .unwrap();

        assert_eq!(bytes, PDF_BODY.len() as u64);
        assert_eq!(std::fs::read(&target).unwrap(), PDF_BODY);
        assert!(!part_path_for(&target).exists());
    }

    #[tokio::test]
    async fn test_download_pdf_rejects_html() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html>login</html>"),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("paper.pdf");
        let err = HttpClient::new()
            .unwrap()
            .download_pdf(&format!("{}/x", server.uri()), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Validation { .. }));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_download_pdf_rejects_bad_signature_and_cleans_up() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04zipdata".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("paper.pdf");
        let err = HttpClient::new()
            .unwrap()
            .download_pdf(&format!("{}/x", server.uri()), &target)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("%PDF"));
        assert!(!target.exists());
        assert!(!part_path_for(&target).exists());
    }

    #[tokio::test]
    async fn test_download_pdf_maps_status_and_retry_after() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = HttpClient::new()
            .unwrap()
            .download_pdf(&format!("{}/x", server.uri()), &dir.path().join("a.pdf"))
            .await
            .unwrap_err();
        match err {
            DownloadError::HttpStatus {
                status,
                retry_after,
                ..
            } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after.as_deref(), Some("2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_download_pdf_invalid_url() {
        let dir = TempDir::new().unwrap();
        let err = HttpClient::new()
            .unwrap()
            .download_pdf("not a url", &dir.path().join("a.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
    }
}
