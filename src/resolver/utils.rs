//! Small helpers shared by resolver modules.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Compiles a regex at static init; panics on an invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Trims, lowercases, and strips a leading `www.` and trailing `.`.
#[must_use]
pub fn canonical_host(host: &str) -> String {
    host.trim()
        .trim_end_matches('.')
        .to_ascii_lowercase()
        .trim_start_matches("www.")
        .to_string()
}

/// Canonical host of `url`, if it parses.
#[must_use]
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(canonical_host))
}

/// True when `host` equals `domain` or is a subdomain of it.
#[must_use]
pub fn host_matches(host: &str, domain: &str) -> bool {
    let host = canonical_host(host);
    let domain = canonical_host(domain);
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Resolves a possibly relative link against `base_url`.
///
/// `//host/...` becomes `https://host/...`; `javascript:`, `mailto:` and
/// fragment-only links are rejected.
#[must_use]
pub fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('#') {
        return None;
    }
    let lower = value.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base_url.join(value).ok().map(|url| url.to_string())
}

static YEAR_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"\b(19|20)\d{2}\b"));

/// First 19xx/20xx year in `value`.
#[must_use]
pub fn extract_year_from_str(value: &str) -> Option<String> {
    YEAR_VALUE_RE
        .find(value)
        .map(|capture| capture.as_str().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_host() {
        assert_eq!(canonical_host(" WWW.Example.com. "), "example.com");
        assert_eq!(host_of("https://www.mdpi.com/x").as_deref(), Some("mdpi.com"));
        assert_eq!(host_of("nope"), None);
    }

    #[test]
    fn test_host_matches_subdomains() {
        assert!(host_matches("app.dimensions.ai", "dimensions.ai"));
        assert!(host_matches("dimensions.ai", "dimensions.ai"));
        assert!(!host_matches("notdimensions.ai", "dimensions.ai"));
    }

    #[test]
    fn test_absolutize_url() {
        let base = Url::parse("https://journal.org/article/1").unwrap();
        assert_eq!(
            absolutize_url("/files/a.pdf", &base).as_deref(),
            Some("https://journal.org/files/a.pdf")
        );
        assert_eq!(
            absolutize_url("//cdn.org/a.pdf", &base).as_deref(),
            Some("https://cdn.org/a.pdf")
        );
        assert_eq!(absolutize_url("javascript:void(0)", &base), None);
        assert_eq!(absolutize_url("#top", &base), None);
    }

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year_from_str("Spring 2019 issue").as_deref(), Some("2019"));
        assert_eq!(extract_year_from_str("vol 12"), None);
    }
}
