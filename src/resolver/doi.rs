//! DOI recognition, normalization, and DOI-to-URL conversion.

use std::sync::LazyLock;

use regex::Regex;

use super::utils::compile_static_regex;

/// DOI grammar used for page and URL scanning.
static DOI_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"10\.\d{4,}(?:\.\d+)*/[-._;()/:a-zA-Z0-9]+"));

/// Resolver hosts whose path is a DOI.
const DOI_HOSTS: [&str; 3] = ["doi.org/", "dx.doi.org/", "doi:"];

/// Base URL DOIs are resolved through.
pub const DOI_RESOLVER: &str = "https://doi.org/";

/// Strips trailing punctuation that is not part of a DOI.
fn trim_doi_tail(doi: &str) -> &str {
    let mut doi = doi;
    loop {
        let trimmed = doi.trim_end_matches(['.', ',', ';', ':']);
        let trimmed = if trimmed.ends_with(')')
            && trimmed.matches('(').count() < trimmed.matches(')').count()
        {
            &trimmed[..trimmed.len() - 1]
        } else {
            trimmed
        };
        if trimmed.len() == doi.len() {
            return doi;
        }
        doi = trimmed;
    }
}

/// First DOI in free text, without trailing punctuation.
#[must_use]
pub fn find_doi_in_text(text: &str) -> Option<String> {
    DOI_RE
        .find(text)
        .map(|m| trim_doi_tail(m.as_str()).to_string())
        .filter(|doi| doi.contains('/') && !doi.ends_with('/'))
}

/// Normalizes a DOI-ish value: drops `doi:` and resolver prefixes, percent-decodes.
///
/// Returns `None` when no DOI is present.
#[must_use]
pub fn normalize_doi(value: &str) -> Option<String> {
    let decoded = urlencoding::decode(value.trim())
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| value.trim().to_string());
    find_doi_in_text(&decoded)
}

/// Lowercased DOI used as a comparison key.
#[must_use]
pub fn doi_key(value: &str) -> Option<String> {
    normalize_doi(value).map(|doi| doi.to_lowercase())
}

/// DOI named by a URL: a `doi.org/<doi>` path, or any DOI pattern in it.
#[must_use]
pub fn doi_from_url(url: &str) -> Option<String> {
    normalize_doi(url)
}

/// True for `doi.org` / `dx.doi.org` links.
#[must_use]
pub fn is_doi_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    lower.starts_with("https://doi.org/")
        || lower.starts_with("http://doi.org/")
        || lower.starts_with("https://dx.doi.org/")
        || lower.starts_with("http://dx.doi.org/")
}

/// Turns a DOI column value into a resolvable URL.
///
/// `doi:` prefixes are stripped, existing `doi.org` URLs are kept, and any
/// value containing `10.` becomes `https://doi.org/<doi>`.
#[must_use]
pub fn doi_to_url(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if is_doi_url(trimmed) {
        return Some(trimmed.to_string());
    }
    let lower = trimmed.to_ascii_lowercase();
    let stripped = DOI_HOSTS
        .iter()
        .find_map(|prefix| lower.find(prefix).map(|pos| &trimmed[pos + prefix.len()..]))
        .unwrap_or(trimmed)
        .trim();
    if !stripped.contains("10.") {
        return None;
    }
    let doi = normalize_doi(stripped).unwrap_or_else(|| stripped.to_string());
    Some(format!("{DOI_RESOLVER}{doi}"))
}

/// Registrant prefix (`10.1016`) of a DOI.
#[must_use]
pub fn doi_prefix(doi: &str) -> Option<&str> {
    doi.split_once('/').map(|(prefix, _)| prefix)
}
