//! Error types for PDF resolution and metadata lookups.

use thiserror::Error;

/// Errors produced while turning a locator into a PDF URL.
///
/// All variants are per-task: the acquisition run records the message as
/// the row's failure reason and moves on.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The page or API could not be fetched.
    #[error("cannot fetch {url}: {reason}")]
    Fetch {
        /// The URL being fetched.
        url: String,
        /// Transport error or HTTP status.
        reason: String,
    },

    /// The page was fetched but no strategy found a PDF link.
    #[error("no PDF link found on {url}")]
    NoPdfFound {
        /// The last page inspected.
        url: String,
    },

    /// DOI-to-page hops exceeded the depth limit.
    #[error("DOI chain exceeded depth {depth} at {doi}")]
    DepthExceeded {
        /// The DOI that would have been followed next.
        doi: String,
        /// The configured limit.
        depth: usize,
    },

    /// The bibliographic search API failed.
    #[error("bibliographic search failed: {reason}")]
    Search {
        /// What went wrong.
        reason: String,
    },

    /// The open-access index failed.
    #[error("open-access lookup failed for {doi}: {reason}")]
    OpenAccess {
        /// The DOI looked up.
        doi: String,
        /// What went wrong.
        reason: String,
    },
}

impl ResolveError {
    /// Creates a fetch error.
    #[must_use]
    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a no-PDF-found error.
    #[must_use]
    pub fn no_pdf_found(url: impl Into<String>) -> Self {
        Self::NoPdfFound { url: url.into() }
    }

    /// Creates a search error.
    #[must_use]
    pub fn search(reason: impl Into<String>) -> Self {
        Self::Search {
            reason: reason.into(),
        }
    }

    /// Creates an open-access lookup error.
    #[must_use]
    pub fn open_access(doi: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OpenAccess {
            doi: doi.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            ResolveError::no_pdf_found("https://x.org/a").to_string(),
            "no PDF link found on https://x.org/a"
        );
        assert_eq!(
            ResolveError::fetch("https://x.org", "HTTP 500").to_string(),
            "cannot fetch https://x.org: HTTP 500"
        );
        let depth = ResolveError::DepthExceeded {
            doi: "10.1/x".into(),
            depth: 3,
        };
        assert!(depth.to_string().contains("depth 3"));
    }
}
