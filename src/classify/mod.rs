//! Optional AI classification used by the screening filters.
//!
//! Filters only see the [`Classifier`] trait: a system instruction and a
//! prompt go in, a JSON object comes out. [`ChatClassifier`] implements it
//! over any OpenAI-compatible chat-completions endpoint.

mod chat;
mod error;

use async_trait::async_trait;

pub use chat::{ChatClassifier, extract_json_object};
pub use error::ClassifyError;

/// Structured classification capability.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Sends one request and parses the answer as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError`] on transport, API or parse failures.
    async fn classify(&self, system: &str, prompt: &str)
    -> Result<serde_json::Value, ClassifyError>;
}
