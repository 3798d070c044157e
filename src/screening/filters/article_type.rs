//! Multi-label article type classification.
//!
//! Three independent dimensions are scored: publication type, methodology and
//! study scope. Indicators found in the first 2000 characters weigh more than
//! the same indicators further into the text.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{ScreeningStage, StageReport, string_list, truncate_chars};
use crate::classify::Classifier;
use crate::record::{ManuscriptRecord, TagValue};
use crate::screening::config::ArticleTypeConfig;

/// Characters treated as the abstract/introduction sample.
const SAMPLE_CHARS: usize = 2000;

/// A label is assigned when its score exceeds this.
const ASSIGN_THRESHOLD: f64 = 5.0;

/// Score given to every label an AI response names.
const AI_LABEL_SCORE: f64 = 20.0;

const ABSTRACT_PROMPT_CHARS: usize = 2000;

const ARTICLE_TYPE_SYSTEM_PROMPT: &str = "You classify academic publications. Assign every \
label that applies in each dimension. Publication types: research_article, review, \
systematic_review, meta_analysis, editorial, letter, case_report, commentary, perspective. \
Methodological types: empirical_study, theoretical_paper, methods_paper. Scope types: \
single_case_study, sample_study. Respond with a JSON object {\"primary_type\": \"<label>\", \
\"all_types\": [..], \"methodological_types\": [..], \"scope_types\": [..]}.";

/// Article type labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArticleType {
    ResearchArticle,
    Review,
    SystematicReview,
    MetaAnalysis,
    Editorial,
    Letter,
    CaseReport,
    Commentary,
    Perspective,
    EmpiricalStudy,
    TheoreticalPaper,
    MethodsPaper,
    SingleCaseStudy,
    SampleStudy,
    Unknown,
}

/// Tie-break order for the primary label.
const PRIORITY: [ArticleType; 14] = [
    ArticleType::MetaAnalysis,
    ArticleType::SystematicReview,
    ArticleType::Review,
    ArticleType::MethodsPaper,
    ArticleType::ResearchArticle,
    ArticleType::CaseReport,
    ArticleType::Editorial,
    ArticleType::Letter,
    ArticleType::Commentary,
    ArticleType::Perspective,
    ArticleType::EmpiricalStudy,
    ArticleType::TheoreticalPaper,
    ArticleType::SingleCaseStudy,
    ArticleType::SampleStudy,
];

impl ArticleType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResearchArticle => "research_article",
            Self::Review => "review",
            Self::SystematicReview => "systematic_review",
            Self::MetaAnalysis => "meta_analysis",
            Self::Editorial => "editorial",
            Self::Letter => "letter",
            Self::CaseReport => "case_report",
            Self::Commentary => "commentary",
            Self::Perspective => "perspective",
            Self::EmpiricalStudy => "empirical_study",
            Self::TheoreticalPaper => "theoretical_paper",
            Self::MethodsPaper => "methods_paper",
            Self::SingleCaseStudy => "single_case_study",
            Self::SampleStudy => "sample_study",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a label, accepting spaces or hyphens for underscores and a few aliases.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace([' ', '-'], "_");
        let parsed = match normalized.as_str() {
            "research_article" | "research" | "original_research" => Self::ResearchArticle,
            "review" | "review_article" | "literature_review" => Self::Review,
            "systematic_review" => Self::SystematicReview,
            "meta_analysis" | "metaanalysis" => Self::MetaAnalysis,
            "editorial" => Self::Editorial,
            "letter" | "letter_to_editor" => Self::Letter,
            "case_report" => Self::CaseReport,
            "commentary" | "comment" => Self::Commentary,
            "perspective" | "viewpoint" => Self::Perspective,
            "empirical_study" | "empirical" => Self::EmpiricalStudy,
            "theoretical_paper" | "theoretical" => Self::TheoreticalPaper,
            "methods_paper" | "methods" | "methodological" => Self::MethodsPaper,
            "single_case_study" | "single_case" => Self::SingleCaseStudy,
            "sample_study" | "sample" => Self::SampleStudy,
            "unknown" => Self::Unknown,
            _ => return None,
        };
        Some(parsed)
    }

    fn is_publication_type(self) -> bool {
        matches!(
            self,
            Self::ResearchArticle
                | Self::Review
                | Self::SystematicReview
                | Self::MetaAnalysis
                | Self::Editorial
                | Self::Letter
                | Self::CaseReport
                | Self::Commentary
                | Self::Perspective
        )
    }

    fn priority(self) -> usize {
        PRIORITY
            .iter()
            .position(|t| *t == self)
            .unwrap_or(PRIORITY.len())
    }
}

impl fmt::Display for ArticleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleClassification {
    pub primary_type: ArticleType,
    /// Assigned labels, primary first.
    pub all_types: Vec<ArticleType>,
    pub methodological_types: Vec<ArticleType>,
    pub scope_types: Vec<ArticleType>,
    pub type_scores: BTreeMap<ArticleType, f64>,
}

impl ArticleClassification {
    fn unknown() -> Self {
        Self {
            primary_type: ArticleType::Unknown,
            all_types: Vec::new(),
            methodological_types: Vec::new(),
            scope_types: Vec::new(),
            type_scores: BTreeMap::new(),
        }
    }

    /// True if `label` is primary or among any assigned dimension.
    #[must_use]
    pub fn has(&self, label: ArticleType) -> bool {
        self.primary_type == label
            || self.all_types.contains(&label)
            || self.methodological_types.contains(&label)
            || self.scope_types.contains(&label)
    }

    fn write_tags(&self, record: &mut ManuscriptRecord) {
        let names = |labels: &[ArticleType]| -> Vec<String> {
            labels.iter().map(|t| t.as_str().to_string()).collect()
        };
        record.set_tag("article_type", self.primary_type.as_str());
        record.set_tag("all_article_types", names(&self.all_types));
        record.set_tag("methodological_types", names(&self.methodological_types));
        record.set_tag("scope_types", names(&self.scope_types));
        record.set_tag(
            "type_scores",
            TagValue::Scores(
                self.type_scores
                    .iter()
                    .map(|(t, s)| (t.as_str().to_string(), *s))
                    .collect(),
            ),
        );
    }
}

// ==================== Indicator scoring ====================

/// Lowercased text with its leading sample.
struct Corpus<'a> {
    sample: &'a str,
    full: &'a str,
}

impl Corpus<'_> {
    fn has(&self, term: &str) -> bool {
        self.full.contains(term)
    }

    /// `in_sample` per term found early, else `in_full` if found anywhere.
    fn tiered(&self, terms: &[&str], in_sample: f64, in_full: f64) -> f64 {
        terms
            .iter()
            .map(|term| {
                if self.sample.contains(term) {
                    in_sample
                } else if self.full.contains(term) {
                    in_full
                } else {
                    0.0
                }
            })
            .sum()
    }

    /// `weight` per term found anywhere.
    fn anywhere(&self, terms: &[&str], weight: f64) -> f64 {
        terms.iter().filter(|t| self.full.contains(*t)).count() as f64 * weight
    }

    fn chars(&self) -> usize {
        self.full.chars().count()
    }
}

fn systematic_review_score(c: &Corpus<'_>) -> f64 {
    c.tiered(
        &[
            "systematic review",
            "prisma",
            "cochrane",
            "prospero",
            "systematic literature review",
            "systematic search",
        ],
        10.0,
        5.0,
    ) + c.anywhere(
        &[
            "inclusion criteria",
            "exclusion criteria",
            "database search",
            "search strategy",
            "quality assessment",
            "risk of bias",
            "data extraction",
        ],
        3.0,
    )
}

fn meta_analysis_score(c: &Corpus<'_>) -> f64 {
    let mut score = 0.0;
    if ["meta-analysis", "meta analysis", "metaanalysis"]
        .iter()
        .any(|t| c.sample.contains(t))
    {
        score += 15.0;
    }
    score += c.anywhere(
        &[
            "pooled",
            "forest plot",
            "funnel plot",
            "heterogeneity",
            "random effects",
            "fixed effects",
            "effect size",
            "pooled estimate",
            "combined results",
            "statistical synthesis",
        ],
        4.0,
    );
    if score > 0.0 && c.has("systematic review") {
        score += 5.0;
    }
    score
}

fn review_score(c: &Corpus<'_>) -> f64 {
    let mut score = c.tiered(
        &[
            "literature review",
            "narrative review",
            "scoping review",
            "integrative review",
            "critical review",
            "review of",
            "reviews the",
            "we review",
            "this review",
        ],
        8.0,
        4.0,
    );
    if c.has("review") && !c.has("data collection") && !c.has("participants") && !c.has("subjects")
    {
        score += 3.0;
    }
    score
}

fn research_score(c: &Corpus<'_>) -> f64 {
    let mut score = c.anywhere(
        &[
            "methods",
            "methodology",
            "data collection",
            "participants",
            "subjects",
            "sample",
            "procedure",
            "materials",
        ],
        2.0,
    ) + c.anywhere(
        &[
            "results",
            "findings",
            "analysis",
            "statistical",
            "significant",
            "p-value",
            "correlation",
            "regression",
        ],
        2.0,
    );
    if c.has("introduction") && c.has("discussion") {
        score += 3.0;
    }
    // Section headings and first-person research claims.
    score += c.anywhere(&["methods:", "results:"], 3.0);
    score += c.anywhere(
        &[
            "we conducted",
            "we performed",
            "we recruited",
            "we analyzed",
            "we measured",
            "we collected",
        ],
        2.0,
    );
    score
}

fn editorial_score(c: &Corpus<'_>) -> f64 {
    let mut score = c.tiered(
        &[
            "editorial",
            "editor's",
            "from the editor",
            "guest editorial",
            "this issue",
            "in this issue",
            "special issue",
        ],
        10.0,
        5.0,
    );
    if score > 0.0 && c.chars() < 3000 {
        score += 3.0;
    }
    score
}

fn letter_score(c: &Corpus<'_>) -> f64 {
    let mut score = c.tiered(
        &[
            "letter to",
            "dear editor",
            "to the editor",
            "correspondence",
            "we read with interest",
            "response to",
            "reply to",
            "comment on",
        ],
        10.0,
        5.0,
    );
    if score > 0.0 && c.chars() < 2000 {
        score += 3.0;
    }
    score
}

fn case_report_score(c: &Corpus<'_>) -> f64 {
    let mut score = c.tiered(
        &[
            "case report",
            "case presentation",
            "case study",
            "patient presentation",
            "clinical case",
            "case description",
            "we report",
            "we present a case",
            "year-old",
            "presented with",
            "chief complaint",
            "medical history",
            "clinical findings",
            "diagnosis",
            "treatment",
            "follow-up",
        ],
        4.0,
        2.0,
    );
    if c.has("patient") && c.has("diagnosis") {
        score += 3.0;
    }
    score
}

fn commentary_score(c: &Corpus<'_>) -> f64 {
    c.tiered(
        &[
            "commentary",
            "comment",
            "viewpoint",
            "opinion",
            "we comment",
            "authors comment",
            "invited commentary",
        ],
        8.0,
        4.0,
    )
}

fn perspective_score(c: &Corpus<'_>) -> f64 {
    c.tiered(
        &[
            "perspective",
            "point of view",
            "personal view",
            "author's perspective",
            "our perspective",
        ],
        8.0,
        4.0,
    )
}

fn empirical_score(c: &Corpus<'_>) -> f64 {
    let mut score = c.tiered(
        &[
            "data collection",
            "data were collected",
            "collected data",
            "gathered data",
            "survey",
            "experiment",
            "observation",
            "measurement",
            "empirical",
            "fieldwork",
            "interviews",
            "questionnaire",
        ],
        4.0,
        2.0,
    ) + c.anywhere(
        &[
            "statistical analysis",
            "data analysis",
            "analyzed",
            "tested",
            "measured",
            "calculated",
            "regression",
            "correlation",
            "anova",
            "t-test",
        ],
        2.0,
    );
    if c.has("results") && (c.has("data") || c.has("participants") || c.has("sample")) {
        score += 3.0;
    }
    score
}

fn theoretical_score(c: &Corpus<'_>) -> f64 {
    let mut score = c.tiered(
        &[
            "theoretical",
            "conceptual",
            "framework",
            "model",
            "theory",
            "proposition",
            "hypothesis",
            "conceptualize",
            "theorize",
            "theoretical framework",
            "conceptual model",
            "theoretical model",
        ],
        4.0,
        2.0,
    ) + c.anywhere(
        &[
            "we propose",
            "we argue",
            "we posit",
            "we theorize",
            "this paper argues",
            "we conceptualize",
            "philosophical",
            "epistemological",
            "ontological",
        ],
        3.0,
    );
    if c.has("data collection") || c.has("empirical") {
        score -= 5.0;
    }
    score
}

fn methods_score(c: &Corpus<'_>) -> f64 {
    c.tiered(
        &[
            "novel method",
            "new method",
            "method for",
            "technique for",
            "algorithm",
            "protocol",
            "procedure",
            "methodology",
            "methodological",
            "we present a method",
            "we introduce",
            "we develop",
        ],
        5.0,
        2.0,
    )
}

fn single_case_score(c: &Corpus<'_>) -> f64 {
    let mut score = c.tiered(
        &[
            "single case",
            "one case",
            "individual case",
            "one patient",
            "single patient",
            "one company",
            "single company",
            "one organization",
            "single organization",
            "n=1",
            "n = 1",
            "single subject",
            "individual subject",
        ],
        10.0,
        5.0,
    );
    if (c.has("case study") || c.has("case analysis"))
        && !c.has("multiple")
        && !c.has("cases")
        && !c.has("comparative")
    {
        score += 5.0;
    }
    score
}

fn sample_score(c: &Corpus<'_>) -> f64 {
    let mut score = c.tiered(
        &[
            "participants",
            "subjects",
            "respondents",
            "patients",
            "sample",
            "cohort",
            "population",
            "cases",
            "companies",
            "organizations",
            "individuals",
        ],
        3.0,
        1.5,
    ) + c.anywhere(
        &[
            "cross-sectional",
            "longitudinal",
            "cohort study",
            "case-control",
            "randomized",
            "controlled trial",
            "survey",
            "questionnaire",
            "recruited",
            "enrolled",
            "sampled",
        ],
        4.0,
    );
    if (c.has("n=") || c.has("n =")) && !c.has("n=1") && !c.has("n = 1") {
        score += 5.0;
    }
    score
}

/// Highest score wins; equal scores fall back to priority order.
fn best_of<'a>(scores: impl Iterator<Item = (&'a ArticleType, &'a f64)>) -> Option<ArticleType> {
    scores
        .filter(|(_, s)| **s > 0.0)
        .min_by(|(ta, sa), (tb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ta.priority().cmp(&tb.priority()))
        })
        .map(|(t, _)| *t)
}

/// Keyword and structure based classification of `text`.
#[must_use]
pub fn classify_rule_based(text: &str) -> ArticleClassification {
    let lower = text.to_lowercase();
    let corpus = Corpus {
        sample: truncate_chars(&lower, SAMPLE_CHARS),
        full: &lower,
    };
    let mut result = ArticleClassification::unknown();
    let scores = &mut result.type_scores;

    let publication: [(ArticleType, fn(&Corpus<'_>) -> f64); 9] = [
        (ArticleType::SystematicReview, systematic_review_score),
        (ArticleType::MetaAnalysis, meta_analysis_score),
        (ArticleType::Review, review_score),
        (ArticleType::Editorial, editorial_score),
        (ArticleType::Letter, letter_score),
        (ArticleType::CaseReport, case_report_score),
        (ArticleType::Commentary, commentary_score),
        (ArticleType::Perspective, perspective_score),
        (ArticleType::ResearchArticle, research_score),
    ];
    for (label, score_fn) in publication {
        let score = score_fn(&corpus);
        if score > 0.0 {
            scores.insert(label, score);
        }
    }

    let methodological: [(ArticleType, fn(&Corpus<'_>) -> f64); 3] = [
        (ArticleType::EmpiricalStudy, empirical_score),
        (ArticleType::TheoreticalPaper, theoretical_score),
        (ArticleType::MethodsPaper, methods_score),
    ];
    for (label, score_fn) in methodological {
        let score = score_fn(&corpus);
        if score > ASSIGN_THRESHOLD {
            scores.insert(label, score);
            result.methodological_types.push(label);
        }
    }

    let has_empirical_content = [
        ArticleType::EmpiricalStudy,
        ArticleType::ResearchArticle,
        ArticleType::CaseReport,
    ]
    .iter()
    .any(|t| scores.get(t).is_some_and(|s| *s > 0.0));
    if has_empirical_content {
        let scope: [(ArticleType, fn(&Corpus<'_>) -> f64); 2] = [
            (ArticleType::SingleCaseStudy, single_case_score),
            (ArticleType::SampleStudy, sample_score),
        ];
        for (label, score_fn) in scope {
            let score = score_fn(&corpus);
            if score > ASSIGN_THRESHOLD {
                scores.insert(label, score);
                result.scope_types.push(label);
            }
        }
    }

    result.primary_type = best_of(scores.iter().filter(|(t, _)| t.is_publication_type()))
        .or_else(|| best_of(scores.iter()))
        .unwrap_or(ArticleType::Unknown);

    let mut assigned: Vec<ArticleType> = scores
        .iter()
        .filter(|(t, s)| **s > ASSIGN_THRESHOLD && **t != result.primary_type)
        .map(|(t, _)| *t)
        .collect();
    assigned.sort_by_key(|t| t.priority());
    if result.primary_type != ArticleType::Unknown {
        assigned.insert(0, result.primary_type);
    }
    result.all_types = assigned;
    result
}

/// Reads an AI classification; `None` when it names no usable label.
fn parse_ai_response(value: &serde_json::Value) -> Option<ArticleClassification> {
    let labels = |key: &str| -> Vec<ArticleType> {
        let mut parsed: Vec<ArticleType> = string_list(value, key)
            .iter()
            .filter_map(|l| ArticleType::parse(l))
            .filter(|t| *t != ArticleType::Unknown)
            .collect();
        parsed.dedup();
        parsed
    };
    let primary = value
        .get("primary_type")
        .and_then(serde_json::Value::as_str)
        .and_then(ArticleType::parse);
    let mut all_types = labels("all_types");
    let methodological_types = labels("methodological_types");
    let scope_types = labels("scope_types");

    let primary = match primary {
        Some(p) if p != ArticleType::Unknown => p,
        _ => *all_types.first()?,
    };
    all_types.retain(|t| *t != primary);
    all_types.insert(0, primary);

    let type_scores = all_types
        .iter()
        .chain(&methodological_types)
        .chain(&scope_types)
        .map(|t| (*t, AI_LABEL_SCORE))
        .collect();
    Some(ArticleClassification {
        primary_type: primary,
        all_types,
        methodological_types,
        scope_types,
        type_scores,
    })
}

/// Article type filter with exclusion flags and an optional include list.
#[derive(Debug, Clone)]
pub struct ArticleTypeFilter {
    use_ai: bool,
    exclusions: Vec<(&'static str, Vec<ArticleType>)>,
    include_types: Vec<ArticleType>,
}

impl ArticleTypeFilter {
    #[must_use]
    pub fn new(config: &ArticleTypeConfig) -> Self {
        let rules = [
            (
                config.exclude_reviews,
                "review",
                vec![
                    ArticleType::Review,
                    ArticleType::SystematicReview,
                    ArticleType::MetaAnalysis,
                ],
            ),
            (config.exclude_editorials, "editorial", vec![ArticleType::Editorial]),
            (config.exclude_letters, "letter", vec![ArticleType::Letter]),
            (config.exclude_theoretical, "theoretical", vec![ArticleType::TheoreticalPaper]),
            (config.exclude_empirical, "empirical", vec![ArticleType::EmpiricalStudy]),
            (config.exclude_methods, "methods", vec![ArticleType::MethodsPaper]),
            (config.exclude_single_case, "single_case", vec![ArticleType::SingleCaseStudy]),
            (config.exclude_sample, "sample_study", vec![ArticleType::SampleStudy]),
        ];
        let exclusions = rules
            .into_iter()
            .filter(|(enabled, _, _)| *enabled)
            .map(|(_, name, labels)| (name, labels))
            .collect();

        let include_types = config
            .include_types
            .iter()
            .filter_map(|label| {
                let parsed = ArticleType::parse(label);
                if parsed.is_none() {
                    warn!(label = %label, "ignoring unknown article type in include_types");
                }
                parsed
            })
            .collect();

        Self {
            use_ai: config.use_ai,
            exclusions,
            include_types,
        }
    }

    /// Exclusion reason for `classification`, or `None` to keep the record.
    #[must_use]
    pub fn verdict(&self, classification: &ArticleClassification) -> Option<String> {
        if !self.include_types.is_empty() {
            if self.include_types.iter().any(|t| classification.has(*t)) {
                return None;
            }
            return Some(format!(
                "Article type not in include list: {}",
                classification.primary_type
            ));
        }
        let triggered: Vec<&str> = self
            .exclusions
            .iter()
            .filter(|(_, labels)| labels.iter().any(|t| classification.has(*t)))
            .map(|(name, _)| *name)
            .collect();
        (!triggered.is_empty()).then(|| format!("Article type excluded: {}", triggered.join(", ")))
    }

    fn rule_text(record: &ManuscriptRecord) -> String {
        match record.field("title") {
            Some(title) => format!("{title}\n{}", record.text()),
            None => record.text().to_string(),
        }
    }

    async fn classify_with_ai(
        classifier: &dyn Classifier,
        record: &ManuscriptRecord,
    ) -> Option<ArticleClassification> {
        let prompt = format!(
            "Title: {}\nAbstract: {}",
            record.field("title").unwrap_or_default(),
            truncate_chars(record.text(), ABSTRACT_PROMPT_CHARS)
        );
        match classifier.classify(ARTICLE_TYPE_SYSTEM_PROMPT, &prompt).await {
            Ok(value) => {
                let parsed = parse_ai_response(&value);
                if parsed.is_none() {
                    warn!(record_id = record.id(), "AI article type response had no labels, using rules");
                }
                parsed
            }
            Err(e) => {
                warn!(record_id = record.id(), error = %e, "AI article type classification failed, using rules");
                None
            }
        }
    }
}

#[async_trait]
impl ScreeningStage for ArticleTypeFilter {
    fn name(&self) -> &'static str {
        "article_type"
    }

    fn statistic_key(&self) -> &'static str {
        "article_type_excluded"
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
                Some(classifier) => Self::classify_with_ai(classifier, record).await,
                None => None,
            };
            let classification = ai.unwrap_or_else(|| classify_rule_based(&Self::rule_text(record)));
            classification.write_tags(record);

            if let Some(reason) = self.verdict(&classification) {
                debug!(record_id = record.id(), reason = %reason, "article type excluded");
                if record.exclude(reason) {
                    report.excluded += 1;
                }
            }
        }

        info!(excluded = report.excluded, "article type filter finished");
        report
    }
}
