//! User-Agent string shared by every outgoing request.

/// Project URL advertised to servers (RFC 9308 good citizenship).
const PROJECT_UA_URL: &str = "https://github.com/fierce/sift";

/// `sift/<version> (literature-screening; +<url>)`.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("sift/{version} (literature-screening; +{PROJECT_UA_URL})")
}
