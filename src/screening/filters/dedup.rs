//! Duplicate detection.
//!
//! Each record is compared against the originals seen before it, in input
//! order, so the earliest matching record is always the original.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ScreeningStage, StageReport};
use crate::classify::Classifier;
use crate::record::ManuscriptRecord;
use crate::screening::config::DeduplicationConfig;

/// Compared when `compare_fields` is empty.
const DEFAULT_COMPARE_FIELDS: [&str; 4] = ["doi", "title", "authors", "year"];

/// Fields whose exact match alone proves a duplicate.
const IDENTIFIER_FIELDS: [&str; 3] = ["doi", "pmid", "pmcid"];

const AUTHOR_FIELDS: [&str; 3] = ["authors", "author", "creators"];
const YEAR_FIELDS: [&str; 3] = ["year", "publication_year", "pub_year"];
const TITLE_FIELDS: [&str; 1] = ["title"];
const ABSTRACT_FIELDS: [&str; 1] = ["abstract"];

const DEDUP_SYSTEM_PROMPT: &str = "You compare bibliographic records and decide whether they \
describe the same publication. Records of one publication often differ in author name format \
(\"Smith, J.\" vs \"John Smith\"), diacritics, capitalization, punctuation, encoding errors, and \
abbreviated journal names. Respond with a JSON object: {\"is_duplicate\": true} or \
{\"is_duplicate\": false}.";

/// Lowercases, drops punctuation and collapses whitespace.
#[must_use]
pub fn normalize_for_comparison(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Levenshtein distance of at most one after normalization. Empty values never match.
#[must_use]
pub fn near_equal(a: &str, b: &str) -> bool {
    let a = normalize_for_comparison(a);
    let b = normalize_for_comparison(b);
    !a.is_empty() && !b.is_empty() && strsim::levenshtein(&a, &b) <= 1
}

/// Identifier normalization: DOI resolver prefixes and `doi:` removed, lowercased.
fn normalize_identifier(value: &str) -> String {
    let lower = value.trim().to_lowercase();
    let stripped = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"]
        .iter()
        .find_map(|prefix| lower.strip_prefix(prefix))
        .unwrap_or(&lower);
    stripped.trim().to_string()
}

fn is_identifier(field: &str) -> bool {
    IDENTIFIER_FIELDS.contains(&field)
}

/// Rule-based duplicate filter with optional AI pair verdicts.
#[derive(Debug, Clone)]
pub struct DeduplicationFilter {
    use_ai: bool,
    identifiers: Vec<String>,
    others: Vec<String>,
}

impl DeduplicationFilter {
    #[must_use]
    pub fn new(config: &DeduplicationConfig) -> Self {
        let fields: Vec<String> = if config.compare_fields.is_empty() {
            DEFAULT_COMPARE_FIELDS.iter().map(|f| (*f).to_string()).collect()
        } else {
            config
                .compare_fields
                .iter()
                .map(|f| f.trim().to_lowercase())
                .filter(|f| !f.is_empty())
                .collect()
        };
        let (identifiers, others) = fields.into_iter().partition(|f| is_identifier(f));
        Self {
            use_ai: config.use_ai,
            identifiers,
            others,
        }
    }

    fn value<'a>(record: &'a ManuscriptRecord, field: &str) -> Option<&'a str> {
        if field == "text" {
            let text = record.text().trim();
            return (!text.is_empty()).then_some(text);
        }
        record.field(field)
    }

    /// Rule (a): a shared identifier.
    fn identifier_match(&self, a: &ManuscriptRecord, b: &ManuscriptRecord) -> bool {
        self.identifiers.iter().any(|field| {
            match (Self::value(a, field), Self::value(b, field)) {
                (Some(x), Some(y)) => {
                    let (x, y) = (normalize_identifier(x), normalize_identifier(y));
                    !x.is_empty() && x == y
                }
                _ => false,
            }
        })
    }

    fn has_any(&self, names: &[&str]) -> bool {
        self.others.iter().any(|f| names.contains(&f.as_str()))
    }

    /// Rule (b): combined-field heuristic.
    fn combined_match(&self, a: &ManuscriptRecord, b: &ManuscriptRecord) -> bool {
        if self.others.is_empty() {
            return false;
        }
        if self.has_any(&AUTHOR_FIELDS) && self.has_any(&YEAR_FIELDS) {
            let authors = match (a.first_field(&AUTHOR_FIELDS), b.first_field(&AUTHOR_FIELDS)) {
                (Some(x), Some(y)) => near_equal(x, y),
                _ => false,
            };
            let year = match (a.first_field(&YEAR_FIELDS), b.first_field(&YEAR_FIELDS)) {
                (Some(x), Some(y)) => x.trim() == y.trim(),
                _ => false,
            };
            if !(authors && year) {
                return false;
            }
            let pair_near = |names: &[&str]| match (a.first_field(names), b.first_field(names)) {
                (Some(x), Some(y)) => near_equal(x, y),
                _ => false,
            };
            return pair_near(&TITLE_FIELDS) || pair_near(&ABSTRACT_FIELDS);
        }
        self.others
            .iter()
            .all(|field| match (Self::value(a, field), Self::value(b, field)) {
                (Some(x), Some(y)) => near_equal(x, y),
                _ => false,
            })
    }

    fn describe(&self, record: &ManuscriptRecord) -> String {
        let mut lines: Vec<String> = self
            .identifiers
            .iter()
            .chain(self.others.iter())
            .filter_map(|field| Self::value(record, field).map(|v| format!("{field}: {v}")))
            .collect();
        if lines.is_empty() {
            lines.push(format!("text: {}", super::truncate_chars(record.text(), 500)));
        }
        lines.join("\n")
    }

    async fn ai_match(
        &self,
        classifier: &dyn Classifier,
        a: &ManuscriptRecord,
        b: &ManuscriptRecord,
    ) -> Option<bool> {
        let prompt = format!(
            "Record A:\n{}\n\nRecord B:\n{}\n\nAre these the same publication?",
            self.describe(a),
            self.describe(b)
        );
        match classifier.classify(DEDUP_SYSTEM_PROMPT, &prompt).await {
            Ok(value) => {
                let verdict = value.get("is_duplicate").and_then(serde_json::Value::as_bool);
                if verdict.is_none() {
                    warn!(a = a.id(), b = b.id(), "AI duplicate verdict missing, using rules");
                }
                verdict
            }
            Err(e) => {
                warn!(a = a.id(), b = b.id(), error = %e, "AI duplicate check failed, using rules");
                None
            }
        }
    }
}

#[async_trait]
impl ScreeningStage for DeduplicationFilter {
    fn name(&self) -> &'static str {
        "deduplication"
    }

    fn statistic_key(&self) -> &'static str {
        "duplicates_found"
    }

    async fn apply(
        &self,
        records: &mut [ManuscriptRecord],
        classifier: Option<&dyn Classifier>,
    ) -> StageReport {
        let classifier = classifier.filter(|_| self.use_ai);
        let mut originals: Vec<usize> = Vec::new();
        let mut report = StageReport::default();

        for idx in 0..records.len() {
            if !records[idx].is_included() {
                continue;
            }
            let mut original = None;
            for &candidate in &originals {
                let (earlier, current) = (&records[candidate], &records[idx]);
                let is_duplicate = if self.identifier_match(earlier, current) {
                    true
                } else if let Some(classifier) = classifier {
                    match self.ai_match(classifier, earlier, current).await {
                        Some(verdict) => verdict,
                        None => self.combined_match(earlier, current),
                    }
                } else {
                    self.combined_match(earlier, current)
                };
                if is_duplicate {
                    original = Some(candidate);
                    break;
                }
            }

            match original {
                Some(candidate) => {
                    let original_id = records[candidate].id().to_string();
                    let record = &mut records[idx];
                    record.set_tag("is_duplicate", true);
                    record.set_tag("duplicate_of", original_id.clone());
                    if record.exclude(format!("Duplicate of {original_id}")) {
                        report.excluded += 1;
                    }
                    debug!(record_id = record.id(), original_id, "duplicate found");
                }
                None => originals.push(idx),
            }
        }

        info!(duplicates = report.excluded, "deduplication finished");
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::TagValue;

    fn record(id: &str, fields: &[(&str, &str)]) -> ManuscriptRecord {
        ManuscriptRecord::new(
            id,
            fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            "",
        )
    }

    fn filter(fields: &[&str]) -> DeduplicationFilter {
        DeduplicationFilter::new(&DeduplicationConfig {
            enabled: true,
            use_ai: false,
            compare_fields: fields.iter().map(|f| (*f).to_string()).collect(),
        })
    }

    #[test]
    fn test_near_equal_tolerates_one_edit() {
        assert!(near_equal("Climate Change!", "climate  change"));
        assert!(near_equal("colour", "color"));
        assert!(!near_equal("colour", "colr"));
        assert!(!near_equal("", ""));
        assert!(!near_equal("...", "..."));
    }

    #[test]
    fn test_identifier_normalization() {
        assert_eq!(normalize_identifier("https://doi.org/10.1/X"), "10.1/x");
        assert_eq!(normalize_identifier(" DOI:10.1/x "), "10.1/x");
    }

    #[tokio::test]
    async fn test_shared_doi_marks_second_row() {
        let mut records = vec![
            record("1", &[("doi", "10.1/x"), ("title", "First")]),
            record("2", &[("doi", "10.1/x"), ("title", "Second")]),
        ];
        let report = filter(&["doi"]).apply(&mut records, None).await;

        assert_eq!(report.excluded, 1);
        assert!(records[0].is_included());
        assert!(records[0].tag("is_duplicate").is_none());
        assert!(!records[1].is_included());
        assert_eq!(records[1].tag("is_duplicate"), Some(&TagValue::Bool(true)));
        assert_eq!(records[1].tag("duplicate_of").unwrap().as_str(), Some("1"));
        assert_eq!(records[1].exclusion_reason(), Some("Duplicate of 1"));
    }

    #[tokio::test]
    async fn test_author_year_and_near_title() {
        let mut records = vec![
            record("a", &[("authors", "Smith, J."), ("year", "2020"), ("title", "Soil carbon in drylands")]),
            record("b", &[("authors", "Smith, J"), ("year", "2020"), ("title", "Soil carbon in dryland")]),
            record("c", &[("authors", "Smith, J."), ("year", "2021"), ("title", "Soil carbon in drylands")]),
        ];
        let report = filter(&[]).apply(&mut records, None).await;
        assert_eq!(report.excluded, 1);
        assert!(!records[1].is_included());
        assert!(records[2].is_included(), "different year is not a duplicate");
    }

    #[tokio::test]
    async fn test_earliest_original_wins() {
        let mut records = vec![
            record("1", &[("doi", "10.5/a")]),
            record("2", &[("doi", "10.5/b")]),
            record("3", &[("doi", "10.5/a"), ("pmid", "99")]),
            record("4", &[("doi", "10.5/a")]),
        ];
        filter(&["doi", "pmid"]).apply(&mut records, None).await;
        assert_eq!(records[2].tag("duplicate_of").unwrap().as_str(), Some("1"));
        assert_eq!(records[3].tag("duplicate_of").unwrap().as_str(), Some("1"));
        assert!(records[1].is_included());
    }

    #[tokio::test]
    async fn test_excluded_records_are_untouched() {
        let mut records = vec![
            record("1", &[("doi", "10.1/x")]),
            record("2", &[("doi", "10.1/x")]),
        ];
        records[1].exclude("Excluded earlier");
        let report = filter(&["doi"]).apply(&mut records, None).await;
        assert_eq!(report.excluded, 0);
        assert_eq!(records[1].exclusion_reason(), Some("Excluded earlier"));
        assert!(records[1].tags().is_empty());
    }
}
