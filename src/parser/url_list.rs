//! Plain-text URL lists: one locator per line.

use std::path::Path;

use tracing::{debug, instrument};
use url::Url;

use super::error::{MAX_URL_LENGTH, ParseError};

/// Non-comment, non-blank lines of `content`, trimmed, in input order.
///
/// Lines are not validated here; every entry gets a report row, so invalid
/// ones are rejected per entry by [`validate_url`].
#[must_use]
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Reads and parses a URL list file.
///
/// # Errors
///
/// Returns [`ParseError::Io`] if the file cannot be read.
#[instrument(fields(path = %path.display()))]
pub fn read_url_list(path: &Path) -> Result<Vec<String>, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|e| ParseError::io(path, e))?;
    let urls = parse_url_list(content.strip_prefix('\u{feff}').unwrap_or(&content));
    debug!(count = urls.len(), "read URL list");
    Ok(urls)
}

/// Validates a URL string and normalizes it.
///
/// # Validation rules:
/// - Must not exceed `MAX_URL_LENGTH` (2000 chars)
/// - Must be parseable by the `url` crate
/// - Must use http or https scheme (no ftp, file, etc.)
/// - Must have a host (domain or IP)
///
/// # Errors
///
/// Returns the [`ParseError`] describing the first rule that fails.
pub fn validate_url(raw: &str) -> Result<String, ParseError> {
    let raw = raw.trim();
    if raw.len() > MAX_URL_LENGTH {
        return Err(ParseError::too_long(raw));
    }

    let parsed = Url::parse(raw).map_err(|e| ParseError::malformed(raw, &e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(ParseError::unsupported_scheme(raw, scheme)),
    }

    if parsed.host().is_none() {
        return Err(ParseError::no_host(raw));
    }

    Ok(parsed.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_url_list_skips_comments_and_blanks() {
        let urls = parse_url_list(
            "# exported 2024-01-01\n\nhttps://a.org/1\n   https://b.org/2  \n#https://c.org/3\n",
        );
        assert_eq!(urls, vec!["https://a.org/1", "https://b.org/2"]);
    }

    #[test]
    fn test_parse_url_list_keeps_invalid_entries() {
        let urls = parse_url_list("not a url\nhttps://a.org/1\n");
        assert_eq!(urls.len(), 2, "every entry must reach the report");
    }

    #[test]
    fn test_read_url_list_strips_bom() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(&path, "\u{feff}https://a.org/1\r\nhttps://b.org/2\r\n").unwrap();
        let urls = read_url_list(&path).unwrap();
        assert_eq!(urls, vec!["https://a.org/1", "https://b.org/2"]);
    }

    #[test]
    fn test_read_url_list_missing_file() {
        let err = read_url_list(Path::new("/nonexistent/urls.txt")).unwrap_err();
        assert!(matches!(err, ParseError::Io { .. }));
    }

    // ==================== URL validation ====================

    #[test]
    fn test_validate_url_accepts_http_and_https() {
        assert!(validate_url("http://example.com/paper").is_ok());
        assert!(validate_url("https://example.com/paper.pdf").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_ftp() {
        let err = validate_url("ftp://files.example.com/paper.pdf").unwrap_err();
        assert!(matches!(err, ParseError::InvalidUrl { .. }));
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn test_validate_url_rejects_mailto_and_relative() {
        assert!(validate_url("mailto:someone@example.com").is_err());
        assert!(validate_url("/relative/path.pdf").is_err());
    }

    #[test]
    fn test_validate_url_rejects_too_long() {
        let url = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(matches!(
            validate_url(&url).unwrap_err(),
            ParseError::UrlTooLong { .. }
        ));
    }
}
