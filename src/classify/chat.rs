//! Chat-completions backed classifier.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{ClassifyError, Classifier};
use crate::download::{HttpClient, RateLimiter};
use crate::screening::LlmConfig;

/// AI calls may be slow; allow more than page fetches.
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider.trim().to_ascii_lowercase().as_str() {
        "openai" => Some("https://api.openai.com/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        _ => None,
    }
}

/// Rough token count for a prompt: one token per four characters.
fn estimate_tokens(text: &str) -> u64 {
    u64::try_from(text.chars().count())
        .unwrap_or(u64::MAX)
        .div_ceil(4)
}

/// Spaces requests so the estimated prompt tokens stay within a
/// tokens-per-minute budget.
#[derive(Debug)]
struct TokenPacer {
    tpm: u32,
    next_allowed: Mutex<Option<tokio::time::Instant>>,
}

impl TokenPacer {
    fn new(tpm: u32) -> Self {
        Self {
            tpm,
            next_allowed: Mutex::new(None),
        }
    }

    /// Time `tokens` occupy in the per-minute budget.
    fn budget_for(&self, tokens: u64) -> Duration {
        if self.tpm == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(tokens.saturating_mul(60_000) / u64::from(self.tpm))
    }

    /// Waits for the budget left by earlier requests, then reserves `tokens`.
    async fn acquire(&self, tokens: u64) {
        if self.tpm == 0 {
            return;
        }
        let mut next_allowed = self.next_allowed.lock().await;
        if let Some(at) = *next_allowed {
            let now = tokio::time::Instant::now();
            if at > now {
                debug!(wait_ms = (at - now).as_millis(), tokens, "pacing by token budget");
                tokio::time::sleep_until(at).await;
            }
        }
        *next_allowed = Some(tokio::time::Instant::now() + self.budget_for(tokens));
    }
}

/// OpenAI-compatible classifier paced by the configured requests and
/// tokens per minute.
pub struct ChatClassifier {
    client: HttpClient,
    limiter: RateLimiter,
    tokens: TokenPacer,
    provider: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl ChatClassifier {
    /// Builds a classifier from one `[[filters.llm]]` entry.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::NotConfigured`] when the key is empty or the
    /// provider has no known endpoint and no `base_url`.
    pub fn from_config(config: &LlmConfig, client: HttpClient) -> Result<Self, ClassifyError> {
        if config.api_key.trim().is_empty() {
            return Err(ClassifyError::NotConfigured(format!(
                "no API key for provider '{}'",
                config.provider
            )));
        }
        let base_url = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .or_else(|| default_base_url(&config.provider))
            .ok_or_else(|| {
                ClassifyError::NotConfigured(format!(
                    "unknown provider '{}' requires base_url",
                    config.provider
                ))
            })?
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            limiter: RateLimiter::per_minute(config.rpm_limit),
            tokens: TokenPacer::new(config.tpm_limit),
            provider: config.provider.clone(),
            base_url,
            api_key: config.api_key.trim().to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Uses the first entry that carries an API key.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::NotConfigured`] when no entry has a key, or
    /// when the chosen entry cannot be built.
    pub fn from_configs(configs: &[LlmConfig], client: HttpClient) -> Result<Self, ClassifyError> {
        let config = configs
            .iter()
            .find(|c| !c.api_key.trim().is_empty())
            .ok_or_else(|| {
                ClassifyError::NotConfigured("no [[filters.llm]] entry has an API key".into())
            })?;
        Self::from_config(config, client)
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for ChatClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClassifier")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Parses a completion into a JSON object, tolerating Markdown fences and prose around it.
///
/// # Errors
///
/// Returns [`ClassifyError::Parse`] when no JSON object can be recovered.
pub fn extract_json_object(content: &str) -> Result<serde_json::Value, ClassifyError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    let candidate = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    };
    let value: serde_json::Value =
        serde_json::from_str(candidate).map_err(|e| ClassifyError::Parse(e.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ClassifyError::Parse("expected a JSON object".into()))
    }
}

#[async_trait]
impl Classifier for ChatClassifier {
    fn name(&self) -> &str {
        &self.provider
    }

    #[instrument(skip(self, system, prompt), fields(provider = %self.provider, model = %self.model))]
    async fn classify(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<serde_json::Value, ClassifyError> {
        let url = format!("{}/chat/completions", self.base_url);
        self.limiter.acquire(&url).await;
        self.tokens
            .acquire(estimate_tokens(system) + estimate_tokens(prompt))
            .await;
        let start = Instant::now();

        let request = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .inner()
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "classifier request failed");
                ClassifyError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "classifier API error");
            return Err(ClassifyError::Api(format!("HTTP {}: {error_text}", status.as_u16())));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Parse(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ClassifyError::Api("empty completion".into()))?;

        debug!(
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "classifier completion"
        );
        extract_json_object(&content)
    }
}
