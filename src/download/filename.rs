//! Download filename construction, sanitization, and collision handling.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::resolver::utils::compile_static_regex;

/// Character budget for the title part of a metadata filename.
const TITLE_BUDGET: usize = 50;

/// Numeric suffixes tried before falling back to a timestamp.
const MAX_NUMERIC_SUFFIX: usize = 1000;

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(19|20)\d{2}"));

/// Builds `{year}_{firstAuthorLast}_{title}.pdf` from whatever parts exist.
///
/// Returns `paper_<fallback_id>.pdf` when no part is usable.
#[must_use]
pub fn metadata_filename(
    year: Option<&str>,
    authors: Option<&str>,
    title: Option<&str>,
    fallback_id: &str,
) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(year) = year.and_then(|y| YEAR_RE.find(y)) {
        parts.push(year.as_str().to_string());
    }
    if let Some(author) = authors.and_then(first_author_last_name) {
        parts.push(author);
    }
    if let Some(title) = title.and_then(short_title) {
        parts.push(title);
    }

    if parts.is_empty() {
        let id = sanitize_filename_component(fallback_id);
        let id = if id.is_empty() { "unknown".to_string() } else { id };
        return format!("paper_{id}.pdf");
    }
    format!("{}.pdf", parts.join("_"))
}

/// Last name of the first author in a free-form author list.
pub(crate) fn first_author_last_name(authors: &str) -> Option<String> {
    let first = authors
        .split([';', '|'])
        .next()
        .and_then(|s| s.split(" and ").next())
        .and_then(|s| s.split(" & ").next())
        .map_or("", str::trim);
    if first.is_empty() {
        return None;
    }
    let last = match first.split_once(',') {
        Some((family, _)) => family.trim(),
        None => first.split_whitespace().next_back().unwrap_or(first),
    };
    let cleaned = sanitize_filename_component(last);
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Title without a leading article, cut at a word boundary, sanitized.
fn short_title(title: &str) -> Option<String> {
    let trimmed = title.trim();
    let lower = trimmed.to_lowercase();
    let without_article = ["the ", "a ", "an "]
        .iter()
        .find(|article| lower.starts_with(*article))
        .map_or(trimmed, |article| trimmed[article.len()..].trim_start());

    let mut cut = String::new();
    for word in without_article.split_whitespace() {
        let needed = if cut.is_empty() { word.chars().count() } else { cut.chars().count() + 1 + word.chars().count() };
        if needed > TITLE_BUDGET {
            if cut.is_empty() {
                cut = word.chars().take(TITLE_BUDGET).collect();
            }
            break;
        }
        if !cut.is_empty() {
            cut.push(' ');
        }
        cut.push_str(word);
    }

    let cleaned = sanitize_filename_component(&cut);
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Collapses anything outside `[A-Za-z0-9._-]` (and non-ASCII letters) into single underscores.
pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        let keep = ch.is_alphanumeric() || matches!(ch, '-' | '.');
        if keep {
            out.push(ch);
            prev_sep = false;
        } else if !prev_sep {
            out.push('_');
            prev_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Replaces filesystem-unsafe characters and whitespace with underscores.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }
    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Forces a `.pdf` extension.
#[must_use]
pub fn ensure_pdf_extension(name: &str) -> String {
    let path = Path::new(name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => name.to_string(),
        _ => {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .unwrap_or("downloaded");
            format!("{stem}.pdf")
        }
    }
}

/// Extracts a filename from a Content-Disposition header value.
///
/// Prefers the RFC 5987 `filename*=` form over plain `filename=`.
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    let lower = header.to_ascii_lowercase();

    if let Some(pos) = lower.find("filename*=") {
        let value = header[pos + "filename*=".len()..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded = encoded[..end].trim().trim_matches('"');
            if let Ok(decoded) = urlencoding::decode(encoded)
                && !decoded.trim().is_empty()
            {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = lower.find("filename=")?;
    let value = header[pos + "filename=".len()..].trim();
    if let Some(quoted) = value.strip_prefix('"') {
        let end = quoted.find('"')?;
        let name = quoted[..end].trim();
        return (!name.is_empty()).then(|| name.to_string());
    }
    let end = value.find(';').unwrap_or(value.len());
    let name = value[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Last non-empty, percent-decoded path segment of `url`.
pub(crate) fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()?;
    let decoded = urlencoding::decode(last)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| last.to_string());
    (!decoded.trim().is_empty()).then_some(decoded)
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Picks a path in `dir` that exists neither on disk nor in `reserved`, and reserves it.
///
/// Collisions append `_1`, `_2`, … before the extension; after
/// [`MAX_NUMERIC_SUFFIX`] attempts a timestamp suffix is used.
pub fn reserve_unique_path(dir: &Path, filename: &str, reserved: &mut HashSet<PathBuf>) -> PathBuf {
    let filename = {
        let sanitized = sanitize_filename(filename);
        if sanitized.trim_matches('_').is_empty() {
            "downloaded.pdf".to_string()
        } else {
            sanitized
        }
    };
    let taken = |path: &Path, reserved: &HashSet<PathBuf>| path.exists() || reserved.contains(path);

    let base_path = dir.join(&filename);
    if !taken(&base_path, reserved) {
        reserved.insert(base_path.clone());
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 1..MAX_NUMERIC_SUFFIX {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !taken(&candidate, reserved) {
            reserved.insert(candidate.clone());
            return candidate;
        }
    }

    let mut candidate = dir.join(format!("{stem}_{}{ext}", unix_timestamp()));
    let mut bump = 1;
    while taken(&candidate, reserved) {
        candidate = dir.join(format!("{stem}_{}_{bump}{ext}", unix_timestamp()));
        bump += 1;
    }
    reserved.insert(candidate.clone());
    candidate
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_metadata_filename_full() {
        let name = metadata_filename(
            Some("Published 2021-04"),
            Some("Smith, John; Doe, Jane"),
            Some("The Effects of Heat on Crops"),
            "7",
        );
        assert_eq!(name, "2021_Smith_Effects_of_Heat_on_Crops.pdf");
    }

    #[test]
    fn test_metadata_filename_skips_missing_parts() {
        assert_eq!(
            metadata_filename(None, Some("Jane Doe and Bob Roe"), None, "3"),
            "Doe.pdf"
        );
        assert_eq!(metadata_filename(None, None, None, "12"), "paper_12.pdf");
        assert_eq!(metadata_filename(Some("n.d."), Some("  "), Some(""), "4"), "paper_4.pdf");
    }

    #[test]
    fn test_first_author_separators() {
        assert_eq!(first_author_last_name("Ng, A. & Lee, B.").as_deref(), Some("Ng"));
        assert_eq!(first_author_last_name("Ada Lovelace | Charles Babbage").as_deref(), Some("Lovelace"));
        assert_eq!(first_author_last_name("").as_deref(), None);
    }

    #[test]
    fn test_short_title_cuts_at_word_boundary() {
        let title = "An extremely long title about the many interacting drivers of coastal erosion";
        let short = short_title(title).unwrap();
        assert!(short.chars().count() <= TITLE_BUDGET);
        assert!(short.starts_with("extremely_long_title"));
        assert!(!short.ends_with('_'));
    }

    #[test]
    fn test_sanitize_filename_replaces_unsafe_and_whitespace() {
        assert_eq!(sanitize_filename("a/b:c d.pdf"), "a_b_c_d.pdf");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename(""), "_");
    }

    #[test]
    fn test_ensure_pdf_extension() {
        assert_eq!(ensure_pdf_extension("paper.PDF"), "paper.PDF");
        assert_eq!(ensure_pdf_extension("paper.html"), "paper.pdf");
        assert_eq!(ensure_pdf_extension("paper"), "paper.pdf");
    }

    #[test]
    fn test_parse_content_disposition_forms() {
        assert_eq!(
            parse_content_disposition(r#"attachment; filename="paper one.pdf""#).as_deref(),
            Some("paper one.pdf")
        );
        assert_eq!(
            parse_content_disposition("inline; filename=report.pdf; size=10").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            parse_content_disposition("attachment; filename*=UTF-8''%C3%A9tude.pdf").as_deref(),
            Some("étude.pdf")
        );
        assert_eq!(parse_content_disposition("attachment"), None);
    }

    #[test]
    fn test_filename_from_url_decodes_tail() {
        assert_eq!(
            filename_from_url("https://x.org/files/My%20Paper.pdf?dl=1").as_deref(),
            Some("My Paper.pdf")
        );
        assert_eq!(filename_from_url("https://x.org/a/b/").as_deref(), Some("b"));
        assert_eq!(filename_from_url("https://x.org/"), None);
    }

    #[test]
    fn test_reserve_unique_path_handles_disk_and_reserved() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("paper.pdf"), b"x").unwrap();
        let mut reserved = HashSet::new();

        let first = reserve_unique_path(dir.path(), "paper.pdf", &mut reserved);
        let second = reserve_unique_path(dir.path(), "paper.pdf", &mut reserved);
        let other = reserve_unique_path(dir.path(), "other.pdf", &mut reserved);

        assert_eq!(first, dir.path().join("paper_1.pdf"));
        assert_eq!(second, dir.path().join("paper_2.pdf"));
        assert_eq!(other, dir.path().join("other.pdf"));
    }

    #[test]
    fn test_reserve_unique_path_stays_inside_dir() {
        let dir = TempDir::new().unwrap();
        let mut reserved = HashSet::new();
        let path = reserve_unique_path(dir.path(), "../../etc/passwd", &mut reserved);
        assert_eq!(path.parent().unwrap(), dir.path());
    }
}
