//! Screening pipeline: configuration, input loading, filter stages and the
//! orchestrator that runs them.
//!
//! Stages always run in the same order: deduplication, language, article
//! type, topic relevance. A record excluded by one stage is skipped by every
//! later stage, so its tags and exclusion reason stay as that stage left them.

pub mod config;
mod error;
pub mod filters;
mod loader;

use std::collections::BTreeMap;

use tracing::{info, instrument, warn};

use crate::classify::{ChatClassifier, Classifier};
use crate::download::HttpClient;
use crate::record::ManuscriptRecord;

pub use config::{
    ArticleTypeConfig, DeduplicationConfig, FiltersConfig, LanguageConfig, LlmConfig, LogLevel,
    OutputFormat, ProjectConfig, ScoreWeights, ScreeningConfig, TopicRelevanceConfig, load_config,
    parse_config,
};
pub use error::{ConfigError, ScreeningError};
pub use filters::{ScreeningStage, StageReport};
pub use loader::load_records;

/// Statistics key for the number of input records.
pub const TOTAL_RECORDS: &str = "total_records";
/// Statistics key for topic relevance records left unscored.
pub const TOPIC_RELEVANCE_ERRORS: &str = "topic_relevance_errors";

/// Every statistics key, in report order.
pub const STATISTIC_KEYS: [&str; 6] = [
    TOTAL_RECORDS,
    "duplicates_found",
    "language_excluded",
    "article_type_excluded",
    "topic_relevance_excluded",
    TOPIC_RELEVANCE_ERRORS,
];

/// Outcome of a screening run.
#[derive(Debug, Clone)]
pub struct ScreeningResult {
    /// Records in input order, tagged and possibly excluded.
    pub records: Vec<ManuscriptRecord>,
    /// Per-stage counters keyed by [`STATISTIC_KEYS`].
    pub statistics: BTreeMap<String, usize>,
}

impl ScreeningResult {
    #[must_use]
    pub fn total(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn included_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_included()).count()
    }

    #[must_use]
    pub fn excluded_count(&self) -> usize {
        self.total() - self.included_count()
    }
}

/// Builds the enabled stages in their fixed order.
#[must_use]
pub fn build_stages(filters: &FiltersConfig) -> Vec<Box<dyn ScreeningStage>> {
    let mut stages: Vec<Box<dyn ScreeningStage>> = Vec::new();
    if filters.deduplication.enabled {
        stages.push(Box::new(filters::DeduplicationFilter::new(
            &filters.deduplication,
        )));
    }
    if filters.language.enabled {
        stages.push(Box::new(filters::LanguageFilter::new(&filters.language)));
    }
    if filters.article_type.enabled {
        stages.push(Box::new(filters::ArticleTypeFilter::new(
            &filters.article_type,
        )));
    }
    if filters.topic_relevance.enabled {
        stages.push(Box::new(filters::TopicRelevanceFilter::new(
            &filters.topic_relevance,
        )));
    }
    stages
}

/// Runs every enabled stage over `records`.
///
/// `classifier` is only consulted by stages configured with `use_ai`; any
/// classifier failure falls back to that stage's rules.
#[instrument(skip(config, records, classifier), fields(records = records.len()))]
pub async fn screen(
    config: &ScreeningConfig,
    mut records: Vec<ManuscriptRecord>,
    classifier: Option<&dyn Classifier>,
) -> ScreeningResult {
    let mut statistics: BTreeMap<String, usize> =
        STATISTIC_KEYS.iter().map(|k| ((*k).to_string(), 0)).collect();
    statistics.insert(TOTAL_RECORDS.to_string(), records.len());

    for stage in build_stages(&config.filters) {
        let report = stage.apply(&mut records, classifier).await;
        *statistics.entry(stage.statistic_key().to_string()).or_default() += report.excluded;
        if report.errors > 0 {
            warn!(stage = stage.name(), errors = report.errors, "stage left records unscored");
        }
        if stage.statistic_key() == "topic_relevance_excluded" {
            *statistics.entry(TOPIC_RELEVANCE_ERRORS.to_string()).or_default() += report.errors;
        }
        info!(
            stage = stage.name(),
            excluded = report.excluded,
            remaining = records.iter().filter(|r| r.is_included()).count(),
            "stage complete"
        );
    }

    let result = ScreeningResult {
        records,
        statistics,
    };
    info!(
        total = result.total(),
        included = result.included_count(),
        excluded = result.excluded_count(),
        "screening complete"
    );
    result
}

/// Loads the input, screens it and writes the configured output file.
///
/// AI mode is best effort: when no usable `[[filters.llm]]` entry exists the
/// run continues with rule-based filters.
///
/// # Errors
///
/// Returns [`ScreeningError`] if the input cannot be loaded or the output
/// cannot be written.
#[instrument(skip(config, client), fields(input = %config.project.input_file.display()))]
pub async fn run(
    config: &ScreeningConfig,
    client: HttpClient,
) -> Result<ScreeningResult, ScreeningError> {
    let records = load_records(&config.project)?;

    let classifier = if config.filters.wants_ai() {
        match ChatClassifier::from_configs(&config.filters.llm, client) {
            Ok(classifier) => {
                info!(model = classifier.model(), "AI classification enabled");
                Some(classifier)
            }
            Err(e) => {
                warn!(error = %e, "AI mode requested but unavailable, using rule-based filters");
                None
            }
        }
    } else {
        None
    };

    let result = screen(
        config,
        records,
        classifier.as_ref().map(|c| c as &dyn Classifier),
    )
    .await;

    crate::report::write_screening_output(
        &result,
        &config.project.output_file,
        config.project.resolved_output_format(),
    )?;
    Ok(result)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::classify::ClassifyError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: &str, fields: &[(&str, &str)], text: &str) -> ManuscriptRecord {
        ManuscriptRecord::new(
            id,
            fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            text,
        )
    }

    fn config(filters: &str) -> ScreeningConfig {
        let toml = format!(
            "[project]\ninput_file = \"in.csv\"\noutput_file = \"out.csv\"\ntext_column = \"abstract\"\n{filters}"
        );
        parse_config(&toml, Path::new("cfg.toml")).unwrap()
    }

    /// Always fails; counts calls.
    struct FailingClassifier(AtomicUsize);

    #[async_trait]
    impl Classifier for FailingClassifier {
        fn name(&self) -> &str {
            "failing"
        }

        async fn classify(
            &self,
            _system: &str,
            _prompt: &str,
        ) -> Result<serde_json::Value, ClassifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ClassifyError::Network("connection refused".into()))
        }
    }

    const ENGLISH: &str = "This study examines the effects of soil carbon sequestration on the farms of the region.";

    #[tokio::test]
    async fn test_stage_order_and_first_exclusion_wins() {
        let config = config(
            "[filters.deduplication]\nenabled = true\ncompare_fields = [\"doi\"]\n\
             [filters.language]\nenabled = true\naccepted_languages = [\"en\"]\n",
        );
        let records = vec![
            record("1", &[("doi", "10.1/x")], ENGLISH),
            record(
                "2",
                &[("doi", "10.1/x")],
                "Cette étude analyse les effets du changement climatique sur les régions.",
            ),
            record(
                "3",
                &[("doi", "10.1/y")],
                "Cette étude analyse les effets du changement climatique sur les régions.",
            ),
        ];
        let result = screen(&config, records, None).await;

        assert_eq!(result.statistics["total_records"], 3);
        assert_eq!(result.statistics["duplicates_found"], 1);
        assert_eq!(result.statistics["language_excluded"], 1);
        assert_eq!(result.statistics["article_type_excluded"], 0);
        assert_eq!(result.included_count(), 1);
        assert_eq!(result.excluded_count(), 2);

        let duplicate = &result.records[1];
        assert_eq!(duplicate.exclusion_reason(), Some("Duplicate of 1"));
        assert!(
            duplicate.tag("detected_language").is_none(),
            "later stages must skip excluded records"
        );
        assert_eq!(
            result.records[2].exclusion_reason(),
            Some("Language not accepted: fr")
        );
    }

    #[tokio::test]
    async fn test_rule_based_runs_are_deterministic() {
        let config = config(
            "[filters.article_type]\nenabled = true\nexclude_reviews = true\n\
             [filters.topic_relevance]\nenabled = true\ntopics = [\"soil carbon sequestration\"]\nmin_score = 0.3\n",
        );
        let input = || {
            vec![
                record("1", &[("title", "Soil carbon sequestration")], ENGLISH),
                record("2", &[("title", "A literature review of banking")], "This review of banking literature."),
            ]
        };
        let first = screen(&config, input(), None).await;
        let second = screen(&config, input(), None).await;
        for (a, b) in first.records.iter().zip(&second.records) {
            assert_eq!(a.tags(), b.tags());
            assert_eq!(a.exclusion_reason(), b.exclusion_reason());
        }
        assert_eq!(first.statistics, second.statistics);
        assert!(first.records[1].exclusion_reason().unwrap().starts_with("Article type excluded"));
    }

    #[tokio::test]
    async fn test_failing_classifier_falls_back_to_rules() {
        let config = config(
            "[filters.language]\nenabled = true\nuse_ai = true\naccepted_languages = [\"en\"]\n",
        );
        let classifier = FailingClassifier(AtomicUsize::new(0));
        let result = screen(
            &config,
            vec![record("1", &[], ENGLISH)],
            Some(&classifier),
        )
        .await;

        assert_eq!(classifier.0.load(Ordering::SeqCst), 1);
        assert!(result.records[0].is_included());
        assert_eq!(
            result.records[0].tag("detected_language").unwrap().as_str(),
            Some("en")
        );
        assert!(result.records[0].tag("ai_detected_language").is_none());
    }

    #[tokio::test]
    async fn test_classifier_ignored_without_use_ai() {
        let config = config("[filters.language]\nenabled = true\n");
        let classifier = FailingClassifier(AtomicUsize::new(0));
        screen(&config, vec![record("1", &[], ENGLISH)], Some(&classifier)).await;
        assert_eq!(classifier.0.load(Ordering::SeqCst), 0);
    }
}
