//! Screening filter stages.
//!
//! Stages run in a fixed order (deduplication, language, article type,
//! topic relevance). Every stage skips records that an earlier stage
//! excluded, and per-record failures never abort a stage.

mod article_type;
mod dedup;
mod language;
mod topic_relevance;

use async_trait::async_trait;

use crate::classify::Classifier;
use crate::record::ManuscriptRecord;

pub use article_type::{ArticleClassification, ArticleType, ArticleTypeFilter, classify_rule_based};
pub use dedup::{DeduplicationFilter, near_equal, normalize_for_comparison};
pub use language::{LanguageFilter, detect_language, language_code};
pub use topic_relevance::{RelevanceScore, TopicRelevanceFilter, TopicTerms};

/// Counts produced by one stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Records this stage excluded.
    pub excluded: usize,
    /// Records left unscored because of a per-record failure.
    pub errors: usize,
}

/// One screening step over the whole record set.
#[async_trait]
pub trait ScreeningStage: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Statistics key the exclusion count is reported under.
    fn statistic_key(&self) -> &'static str;

    /// Tags and possibly excludes records in place.
    async fn apply(
        &self,
        records: &mut [ManuscriptRecord],
        classifier: Option<&dyn Classifier>,
    ) -> StageReport;
}

/// Reads a string array from an AI response, lowercased and trimmed.
pub(crate) fn string_list(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Truncates to at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
