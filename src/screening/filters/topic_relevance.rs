//! Topic relevance scoring.
//!
//! A record's score is the weighted sum of three sub-scores, capped at 1.0:
//! keyword hits (whole words), concept hits (multi-word phrases) and how well
//! its journal or field columns line up with the topic vocabulary.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use rake::Rake;
use regex::Regex;
use stop_words::LANGUAGE;
use tracing::{debug, info, instrument, warn};

use super::{ScreeningStage, StageReport, string_list, truncate_chars};
use crate::classify::Classifier;
use crate::record::ManuscriptRecord;
use crate::screening::config::{ScoreWeights, TopicRelevanceConfig};

/// Sub-score boost applied to the hit fraction before capping at 1.0.
const HIT_BOOST: f64 = 1.5;

/// Word count at which text length stops adding confidence.
const CONFIDENCE_WORDS: f64 = 500.0;

/// Match count at which matches stop adding confidence.
const CONFIDENCE_MATCHES: f64 = 10.0;

/// Field relevance when the record has no journal/field columns.
const NEUTRAL_FIELD_SCORE: f64 = 0.5;

const ABSTRACT_PROMPT_CHARS: usize = 1000;

/// Columns read for the matching text, in order.
const TEXT_FIELDS: [&str; 9] = [
    "title",
    "abstract",
    "keywords",
    "subject",
    "research_area",
    "methodology",
    "objectives",
    "summary",
    "introduction",
];

/// Column-name fragments that also feed the matching text.
const EXTRA_TEXT_FRAGMENTS: [&str; 3] = ["keyword", "subject", "topic"];

/// Column-name fragments read for field relevance.
const FIELD_FRAGMENTS: [&str; 5] = ["journal", "field", "discipline", "category", "subject_area"];

const RELEVANCE_SYSTEM_PROMPT: &str = "You are an expert in academic manuscript screening. \
Evaluate whether a manuscript is relevant to the given research topics, considering keyword \
matches, conceptual alignment, field relevance and methodological relevance. Respond with a \
JSON object: {\"overall_score\": 0.0-1.0, \"component_scores\": {\"keyword_match\": .., \
\"concept_match\": .., \"field_relevance\": ..}, \"matched_keywords\": [..], \
\"matched_concepts\": [..], \"confidence\": 0.0-1.0, \"is_relevant\": true|false}.";

/// Keywords and concepts extracted from the configured topics.
#[derive(Debug, Clone)]
pub struct TopicTerms {
    keywords: Vec<String>,
    concepts: Vec<String>,
    keyword_patterns: Vec<Regex>,
}

/// Lowercases and keeps letters, digits, whitespace and hyphens.
fn clean(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect()
}

/// Contiguous `size`-word windows of `words`.
fn windows(words: &[&str], size: usize) -> impl Iterator<Item = String> {
    words.windows(size).map(|w| w.join(" "))
}

impl TopicTerms {
    /// Extracts terms from `topics` with English stop words removed.
    #[must_use]
    pub fn from_topics(topics: &[String]) -> Self {
        let stop_words: HashSet<String> = stop_words::get(LANGUAGE::English)
            .into_iter()
            .map(|w| w.to_lowercase())
            .collect();
        let mut rake_stop_words = rake::StopWords::new();
        for word in &stop_words {
            rake_stop_words.insert(word.clone());
        }
        let rake = Rake::new(rake_stop_words);

        let mut keywords: Vec<String> = Vec::new();
        let mut concepts: BTreeSet<String> = BTreeSet::new();
        for topic in topics {
            let cleaned = clean(topic.trim());
            for word in cleaned.split_whitespace() {
                if word.chars().count() > 2 && !stop_words.contains(word) && !keywords.iter().any(|k| k == word) {
                    keywords.push(word.to_string());
                }
            }

            for phrase in rake.run(&cleaned) {
                let words: Vec<&str> = phrase.keyword.split_whitespace().collect();
                if words.len() < 2 {
                    continue;
                }
                concepts.insert(words.join(" "));
                concepts.extend(windows(&words, 2));
                concepts.extend(windows(&words, 3));
            }
        }

        let keyword_patterns = keywords
            .iter()
            .filter_map(|k| match Regex::new(&format!(r"\b{}\b", regex::escape(k))) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(keyword = %k, error = %e, "skipping unmatchable keyword");
                    None
                }
            })
            .collect();

        Self {
            keywords,
            concepts: concepts.into_iter().collect(),
            keyword_patterns,
        }
    }

    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    #[must_use]
    pub fn concepts(&self) -> &[String] {
        &self.concepts
    }
}

/// Relevance verdict for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceScore {
    pub overall_score: f64,
    pub keyword_score: f64,
    pub concept_score: f64,
    pub field_score: f64,
    pub matched_keywords: Vec<String>,
    pub matched_concepts: Vec<String>,
    pub confidence: f64,
}

fn boosted_fraction(hits: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (hits as f64 / total as f64 * HIT_BOOST).min(1.0)
}

/// Text the keyword and concept matchers read.
fn matching_text(record: &ManuscriptRecord) -> String {
    let mut parts: Vec<&str> = TEXT_FIELDS.iter().filter_map(|f| record.field(f)).collect();
    for (_, value) in record.fields_matching(&EXTRA_TEXT_FRAGMENTS) {
        if !parts.contains(&value) {
            parts.push(value);
        }
    }
    if parts.is_empty() {
        return record.text().trim().to_string();
    }
    parts.join(" ")
}

fn field_score(record: &ManuscriptRecord, terms: &TopicTerms) -> f64 {
    let field_text = record
        .fields_matching(&FIELD_FRAGMENTS)
        .map(|(_, v)| v.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    if field_text.is_empty() {
        return NEUTRAL_FIELD_SCORE;
    }
    let hits = terms
        .keywords
        .iter()
        .filter(|k| field_text.contains(k.as_str()))
        .count();
    match hits {
        0 => 0.2,
        1..=2 => 0.5,
        3..=5 => 0.7,
        _ => 0.9,
    }
}

/// Rule-based score, or `None` when the record has no text to match.
fn score_rule_based(
    record: &ManuscriptRecord,
    terms: &TopicTerms,
    weights: ScoreWeights,
) -> Option<RelevanceScore> {
    let text = matching_text(record);
    if text.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();

    let matched_keywords: Vec<String> = terms
        .keywords
        .iter()
        .zip(&terms.keyword_patterns)
        .filter(|(_, re)| re.is_match(&lower))
        .map(|(k, _)| k.clone())
        .collect();
    let matched_concepts: Vec<String> = terms
        .concepts
        .iter()
        .filter(|c| lower.contains(c.as_str()))
        .cloned()
        .collect();

    let keyword_score = boosted_fraction(matched_keywords.len(), terms.keywords.len());
    let concept_score = boosted_fraction(matched_concepts.len(), terms.concepts.len());
    let field_score = field_score(record, terms);
    let overall_score = (keyword_score * weights.keyword_match
        + concept_score * weights.concept_match
        + field_score * weights.field_relevance)
        .min(1.0);

    let words = text.split_whitespace().count() as f64;
    let matches = (matched_keywords.len() + matched_concepts.len()) as f64;
    let confidence =
        (words / CONFIDENCE_WORDS).min(1.0) * 0.6 + (matches / CONFIDENCE_MATCHES).min(1.0) * 0.4;

    Some(RelevanceScore {
        overall_score,
        keyword_score,
        concept_score,
        field_score,
        matched_keywords,
        matched_concepts,
        confidence,
    })
}

fn unit(value: &serde_json::Value, key: &str) -> Option<f64> {
    value
        .get(key)
        .and_then(serde_json::Value::as_f64)
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
}

/// Reads an AI verdict; `None` without a numeric `overall_score`.
fn parse_ai_response(value: &serde_json::Value) -> Option<RelevanceScore> {
    let overall_score = unit(value, "overall_score")?;
    let components = value.get("component_scores").cloned().unwrap_or_default();
    Some(RelevanceScore {
        overall_score,
        keyword_score: unit(&components, "keyword_match").unwrap_or(0.0),
        concept_score: unit(&components, "concept_match").unwrap_or(0.0),
        field_score: unit(&components, "field_relevance").unwrap_or(0.0),
        matched_keywords: string_list(value, "matched_keywords"),
        matched_concepts: string_list(value, "matched_concepts"),
        confidence: unit(value, "confidence").unwrap_or(0.5),
    })
}

/// Excludes records scoring strictly below `min_score`.
#[derive(Debug, Clone)]
pub struct TopicRelevanceFilter {
    use_ai: bool,
    topics: Vec<String>,
    terms: TopicTerms,
    min_score: f64,
    weights: ScoreWeights,
}

impl TopicRelevanceFilter {
    #[must_use]
    pub fn new(config: &TopicRelevanceConfig) -> Self {
        let topics: Vec<String> = config
            .topics
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let terms = TopicTerms::from_topics(&topics);
        debug!(
            keywords = terms.keywords.len(),
            concepts = terms.concepts.len(),
            "extracted topic terms"
        );
        Self {
            use_ai: config.use_ai,
            topics,
            terms,
            min_score: config.min_score,
            weights: config.score_weights,
        }
    }

    /// Scores one record without AI.
    #[must_use]
    pub fn score(&self, record: &ManuscriptRecord) -> Option<RelevanceScore> {
        score_rule_based(record, &self.terms, self.weights)
    }

    fn prompt(&self, record: &ManuscriptRecord) -> String {
        let mut lines = vec![format!("TOPICS OF INTEREST:\n- {}", self.topics.join("\n- "))];
        lines.push("MANUSCRIPT DATA:".to_string());
        if let Some(title) = record.field("title") {
            lines.push(format!("TITLE: {title}"));
        }
        let abstract_text = record.field("abstract").unwrap_or_else(|| record.text().trim());
        if !abstract_text.is_empty() {
            lines.push(format!(
                "ABSTRACT: {}",
                truncate_chars(abstract_text, ABSTRACT_PROMPT_CHARS)
            ));
        }
        for name in ["keywords", "journal", "subject_area", "methodology"] {
            if let Some(value) = record.field(name) {
                lines.push(format!("{}: {value}", name.to_uppercase()));
            }
        }
        lines.join("\n")
    }

    async fn score_with_ai(
        &self,
        classifier: &dyn Classifier,
        record: &ManuscriptRecord,
    ) -> Option<RelevanceScore> {
        match classifier
            .classify(RELEVANCE_SYSTEM_PROMPT, &self.prompt(record))
            .await
        {
            Ok(value) => {
                let parsed = parse_ai_response(&value);
                if parsed.is_none() {
                    warn!(record_id = record.id(), "AI relevance response had no overall_score, using rules");
                }
                parsed
            }
            Err(e) => {
                warn!(record_id = record.id(), error = %e, "AI relevance scoring failed, using rules");
                None
            }
        }
    }
}

#[async_trait]
impl ScreeningStage for TopicRelevanceFilter {
    fn name(&self) -> &'static str {
        "topic_relevance"
    }

    fn statistic_key(&self) -> &'static str {
        "topic_relevance_excluded"
    }

    #[instrument(skip(self, records, classifier), fields(count = records.len()))]
    async fn apply(
        &self,
        records: &mut [ManuscriptRecord],
        classifier: Option<&dyn Classifier>,
    ) -> StageReport {
        let classifier = classifier.filter(|_| self.use_ai);
        let mut report = StageReport::default();

        for record in records.iter_mut().filter(|r| r.is_included()) {
            let ai = match classifier {
                Some(classifier) => self.score_with_ai(classifier, record).await,
                None => None,
            };
            let Some(score) = ai.or_else(|| self.score(record)) else {
                warn!(record_id = record.id(), "no text to score for topic relevance, keeping record");
                report.errors += 1;
                continue;
            };

            record.set_tag("topic_relevance_score", score.overall_score);
            record.set_tag("topic_relevance_confidence", score.confidence);
            record.set_tag("matched_keywords", score.matched_keywords.clone());
            record.set_tag("matched_concepts", score.matched_concepts.clone());

            if score.overall_score < self.min_score {
                let reason = format!(
                    "Topic relevance score ({:.2}) below minimum threshold ({:.2})",
                    score.overall_score, self.min_score
                );
                debug!(record_id = record.id(), reason = %reason, "topic relevance excluded");
                if record.exclude(reason) {
                    report.excluded += 1;
                }
            }
        }

        info!(
            excluded = report.excluded,
            errors = report.errors,
            "topic relevance filter finished"
        );
        report
    }
}
