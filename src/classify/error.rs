//! Error types for the AI classification capability.

use thiserror::Error;

/// Classification failures.
///
/// Filters treat every variant as a per-record failure and fall back to
/// their rule-based path.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// No usable provider configuration (missing key, unknown provider).
    #[error("classifier not configured: {0}")]
    NotConfigured(String),

    /// Connection failure or timeout.
    #[error("classifier network error: {0}")]
    Network(String),

    /// Non-2xx response or an empty completion.
    #[error("classifier API error: {0}")]
    Api(String),

    /// The completion was not the JSON object that was asked for.
    #[error("classifier returned unparseable output: {0}")]
    Parse(String),
}
