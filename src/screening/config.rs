//! TOML screening configuration.
//!
//! ```toml
//! [project]
//! input_file = "records.csv"
//! output_file = "screened.csv"
//! text_column = "abstract"
//! identifier_column = "id"
//!
//! [filters.deduplication]
//! enabled = true
//! compare_fields = ["doi", "title", "authors", "year"]
//!
//! [filters.language]
//! enabled = true
//! accepted_languages = ["en"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::error::ConfigError;

/// Default keyword-match weight.
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 0.4;
/// Default concept-match weight.
pub const DEFAULT_CONCEPT_WEIGHT: f64 = 0.4;
/// Default field-relevance weight.
pub const DEFAULT_FIELD_WEIGHT: f64 = 0.2;

/// Complete screening configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScreeningConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
}

/// `[project]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub author: String,
    pub version: String,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    /// Column holding the text payload (or a path to a text file).
    pub text_column: String,
    /// Column holding record ids; row numbers are used when empty.
    pub identifier_column: String,
    pub output_format: Option<OutputFormat>,
    pub log_level: Option<LogLevel>,
}

impl ProjectConfig {
    /// Output format, falling back to the output file extension.
    #[must_use]
    pub fn resolved_output_format(&self) -> OutputFormat {
        self.output_format.unwrap_or_else(|| {
            match self.output_file.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("json") => OutputFormat::Json,
                _ => OutputFormat::Csv,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Json,
}

/// Verbosity keyword accepted in `[project] log_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Low,
    Medium,
    High,
}

impl LogLevel {
    /// Equivalent `tracing` filter directive.
    #[must_use]
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Low => "warn",
            Self::Medium => "info",
            Self::High => "debug",
        }
    }
}

/// `[filters]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub deduplication: DeduplicationConfig,
    pub language: LanguageConfig,
    pub article_type: ArticleTypeConfig,
    pub topic_relevance: TopicRelevanceConfig,
    /// `[[filters.llm]]` entries; the first usable one backs AI mode.
    pub llm: Vec<LlmConfig>,
}

impl FiltersConfig {
    fn any_enabled(&self) -> bool {
        self.deduplication.enabled
            || self.language.enabled
            || self.article_type.enabled
            || self.topic_relevance.enabled
    }

    /// True when any enabled filter asks for AI mode.
    #[must_use]
    pub fn wants_ai(&self) -> bool {
        (self.deduplication.enabled && self.deduplication.use_ai)
            || (self.language.enabled && self.language.use_ai)
            || (self.article_type.enabled && self.article_type.use_ai)
            || (self.topic_relevance.enabled && self.topic_relevance.use_ai)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    pub enabled: bool,
    pub use_ai: bool,
    /// Fields compared between records; empty means the standard set.
    pub compare_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    pub enabled: bool,
    pub use_ai: bool,
    /// ISO 639-1 codes or English language names; empty accepts everything.
    pub accepted_languages: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ArticleTypeConfig {
    pub enabled: bool,
    pub use_ai: bool,
    pub exclude_reviews: bool,
    pub exclude_editorials: bool,
    pub exclude_letters: bool,
    pub exclude_theoretical: bool,
    pub exclude_empirical: bool,
    pub exclude_methods: bool,
    pub exclude_single_case: bool,
    pub exclude_sample: bool,
    /// When non-empty, only records carrying one of these labels are kept.
    pub include_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopicRelevanceConfig {
    pub enabled: bool,
    pub use_ai: bool,
    pub topics: Vec<String>,
    pub min_score: f64,
    pub score_weights: ScoreWeights,
}

/// Weights of the three topic-relevance sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub keyword_match: f64,
    pub concept_match: f64,
    pub field_relevance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            keyword_match: DEFAULT_KEYWORD_WEIGHT,
            concept_match: DEFAULT_CONCEPT_WEIGHT,
            field_relevance: DEFAULT_FIELD_WEIGHT,
        }
    }
}

/// Model settings for the classification capability.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub tpm_limit: u32,
    pub rpm_limit: u32,
    /// OpenAI-compatible endpoint; defaults per provider.
    pub base_url: Option<String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("tpm_limit", &self.tpm_limit)
            .field("rpm_limit", &self.rpm_limit)
            .field("base_url", &self.base_url)
            .field("api_key_set", &!self.api_key.is_empty())
            .finish()
    }
}

impl ScreeningConfig {
    /// Checks structural requirements. Called by [`load_config`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for missing project fields, no enabled filter,
    /// negative weights, or an out-of-range `min_score`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.input_file.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "project.input_file",
            });
        }
        if self.project.output_file.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "project.output_file",
            });
        }
        if self.project.text_column.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "project.text_column",
            });
        }
        if !self.filters.any_enabled() {
            return Err(ConfigError::NoFilterEnabled);
        }

        let topic = &self.filters.topic_relevance;
        if topic.enabled {
            let weights = topic.score_weights;
            for (field, value) in [
                ("filters.topic_relevance.score_weights.keyword_match", weights.keyword_match),
                ("filters.topic_relevance.score_weights.concept_match", weights.concept_match),
                ("filters.topic_relevance.score_weights.field_relevance", weights.field_relevance),
            ] {
                if value < 0.0 || !value.is_finite() {
                    return Err(ConfigError::InvalidValue {
                        field,
                        reason: format!("{value} must be a non-negative number"),
                    });
                }
            }
            if !(0.0..=1.0).contains(&topic.min_score) {
                return Err(ConfigError::InvalidValue {
                    field: "filters.topic_relevance.min_score",
                    reason: format!("{} is outside 0..=1", topic.min_score),
                });
            }
            if topic.topics.iter().all(|t| t.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "filters.topic_relevance.topics",
                    reason: "at least one topic is required".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Resolves relative project paths against `base_dir`.
    fn resolve_paths(&mut self, base_dir: &Path) {
        if self.project.input_file.is_relative() {
            self.project.input_file = base_dir.join(&self.project.input_file);
        }
        if self.project.output_file.is_relative() {
            self.project.output_file = base_dir.join(&self.project.output_file);
        }
    }

    /// Fills empty API keys from `SIFT_<PROVIDER>_API_KEY`.
    fn apply_env_api_keys(&mut self) {
        for llm in &mut self.filters.llm {
            if !llm.api_key.trim().is_empty() || llm.provider.trim().is_empty() {
                continue;
            }
            let var = format!("SIFT_{}_API_KEY", llm.provider.trim().to_ascii_uppercase());
            if let Ok(key) = std::env::var(&var) {
                debug!(provider = %llm.provider, env = %var, "using API key from environment");
                llm.api_key = key;
            }
        }
    }
}

/// Parses a configuration from TOML text without touching the filesystem.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] on malformed TOML and any validation error.
pub fn parse_config(content: &str, origin: &Path) -> Result<ScreeningConfig, ConfigError> {
    let mut config: ScreeningConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    config.apply_env_api_keys();
    config.validate()?;
    Ok(config)
}

/// Loads, resolves, and validates a screening configuration file.
///
/// Relative `input_file`/`output_file` paths are taken relative to the
/// config file's directory.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file is unreadable, malformed, or invalid.
#[instrument(fields(path = %path.display()))]
pub fn load_config(path: &Path) -> Result<ScreeningConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_config(&content, path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base_dir);
    debug!(
        input = %config.project.input_file.display(),
        output = %config.project.output_file.display(),
        "loaded screening config"
    );
    Ok(config)
}
