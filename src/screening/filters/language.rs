//! Language detection and allowlist filtering.
//!
//! Titles and abstracts are detected independently. The title wins when it
//! gives a definite answer, since indexing services often translate abstracts
//! but keep the original title.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{ScreeningStage, StageReport, truncate_chars};
use crate::classify::Classifier;
use crate::record::ManuscriptRecord;
use crate::screening::config::LanguageConfig;

/// Returned when no language clears the detection threshold.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Minimum winning score for a lexicon or script verdict.
const MIN_SCORE: usize = 2;

const ABSTRACT_PROMPT_CHARS: usize = 500;

const LANGUAGE_SYSTEM_PROMPT: &str = "You identify the original language of academic \
publications. Abstracts are frequently translated into English by indexing services while the \
title stays in the original language, so weigh the title most heavily. Ignore encoding \
artifacts such as mojibake or stray HTML entities. Respond with a JSON object \
{\"language\": \"<ISO 639-1 code>\"}, or {\"language\": \"unknown\"} if you cannot tell.";

struct Lexicon {
    code: &'static str,
    words: &'static [&'static str],
    chars: &'static [char],
}

const LEXICONS: &[Lexicon] = &[
    Lexicon {
        code: "en",
        words: &[
            "the", "and", "of", "to", "is", "that", "for", "with", "are", "was", "this", "by",
            "from", "which", "we", "were", "be", "these", "an", "at", "or", "between", "study",
            "results", "has", "have",
        ],
        chars: &[],
    },
    Lexicon {
        code: "es",
        words: &[
            "el", "la", "los", "las", "del", "y", "en", "que", "por", "para", "con", "una", "es",
            "se", "un", "como", "más", "entre", "sobre", "este", "esta", "estudio", "resultados",
        ],
        chars: &['ñ', '¿', '¡'],
    },
    Lexicon {
        code: "fr",
        words: &[
            "le", "la", "les", "des", "du", "et", "est", "une", "un", "dans", "pour", "que", "qui",
            "sur", "par", "avec", "cette", "ce", "sont", "au", "aux", "nous", "étude", "résultats",
        ],
        chars: &['è', 'ê', 'ç', 'œ', 'â', 'î', 'û'],
    },
    Lexicon {
        code: "de",
        words: &[
            "der", "die", "das", "und", "ist", "von", "zu", "mit", "den", "dem", "für", "auf",
            "sich", "nicht", "eine", "ein", "wir", "wurde", "bei", "als", "im", "des", "studie",
        ],
        chars: &['ä', 'ö', 'ü', 'ß'],
    },
    Lexicon {
        code: "it",
        words: &[
            "il", "lo", "gli", "della", "di", "che", "per", "con", "una", "sono", "nel", "alla",
            "dei", "delle", "questo", "questa", "studio", "è", "risultati",
        ],
        chars: &['ò', 'ì'],
    },
    Lexicon {
        code: "pt",
        words: &[
            "os", "da", "do", "das", "dos", "em", "que", "para", "com", "uma", "um", "não", "são",
            "pelo", "pela", "estudo", "foi", "resultados",
        ],
        chars: &['ã', 'õ'],
    },
    Lexicon {
        code: "nl",
        words: &[
            "het", "een", "en", "van", "is", "dat", "op", "te", "zijn", "voor", "met", "niet",
            "die", "wordt", "werd", "deze", "bij", "onderzoek",
        ],
        chars: &[],
    },
];

/// English names (and a few native names) of supported languages.
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("english", "en"),
    ("spanish", "es"),
    ("español", "es"),
    ("french", "fr"),
    ("français", "fr"),
    ("german", "de"),
    ("deutsch", "de"),
    ("italian", "it"),
    ("portuguese", "pt"),
    ("dutch", "nl"),
    ("russian", "ru"),
    ("greek", "el"),
    ("arabic", "ar"),
    ("hebrew", "he"),
    ("chinese", "zh"),
    ("japanese", "ja"),
    ("korean", "ko"),
];

/// Maps a language name or code to its lowercase ISO 639-1 code.
///
/// Two-letter codes pass through; unknown names return `None`.
#[must_use]
pub fn language_code(name: &str) -> Option<String> {
    let lower = name.trim().to_lowercase();
    if lower.len() == 2 && lower.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(lower);
    }
    LANGUAGE_NAMES
        .iter()
        .find(|(n, _)| *n == lower)
        .map(|(_, code)| (*code).to_string())
}

#[derive(Default)]
struct ScriptCounts {
    letters: usize,
    cyrillic: usize,
    greek: usize,
    arabic: usize,
    hebrew: usize,
    han: usize,
    kana: usize,
    hangul: usize,
}

fn count_scripts(text: &str) -> ScriptCounts {
    let mut counts = ScriptCounts::default();
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        counts.letters += 1;
        match u32::from(c) {
            0x0400..=0x04FF => counts.cyrillic += 1,
            0x0370..=0x03FF => counts.greek += 1,
            0x0600..=0x06FF => counts.arabic += 1,
            0x0590..=0x05FF => counts.hebrew += 1,
            0x3040..=0x30FF => counts.kana += 1,
            0x4E00..=0x9FFF => counts.han += 1,
            0xAC00..=0xD7AF => counts.hangul += 1,
            _ => {}
        }
    }
    counts
}

/// Non-Latin script verdict, when such a script covers over half the letters.
fn detect_script(text: &str) -> Option<&'static str> {
    let counts = count_scripts(text);
    let cjk = counts.han + counts.kana + counts.hangul;
    let (code, count) = [
        ("ru", counts.cyrillic),
        ("el", counts.greek),
        ("ar", counts.arabic),
        ("he", counts.hebrew),
        ("cjk", cjk),
    ]
    .into_iter()
    .max_by_key(|(_, n)| *n)?;

    if count < MIN_SCORE || count * 2 <= counts.letters {
        return None;
    }
    Some(match code {
        "cjk" if counts.kana > 0 => "ja",
        "cjk" if counts.hangul > 0 => "ko",
        "cjk" => "zh",
        other => other,
    })
}

/// Detects the language of `text` as an ISO 639-1 code, or `"unknown"`.
#[must_use]
pub fn detect_language(text: &str) -> &'static str {
    if text.trim().is_empty() {
        return UNKNOWN_LANGUAGE;
    }
    if let Some(code) = detect_script(text) {
        return code;
    }

    let lower = text.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .collect();

    let mut scores: Vec<(&'static str, usize)> = LEXICONS
        .iter()
        .map(|lexicon| {
            let words = tokens.iter().filter(|t| lexicon.words.contains(*t)).count();
            let chars = lower.chars().filter(|c| lexicon.chars.contains(c)).count();
            (lexicon.code, words + chars)
        })
        .collect();
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    match scores.as_slice() {
        [(code, best), rest @ ..]
            if *best >= MIN_SCORE && rest.first().is_none_or(|(_, next)| next < best) =>
        {
            *code
        }
        _ => UNKNOWN_LANGUAGE,
    }
}

/// Language allowlist filter.
#[derive(Debug, Clone)]
pub struct LanguageFilter {
    use_ai: bool,
    accepted: HashSet<String>,
}

impl LanguageFilter {
    #[must_use]
    pub fn new(config: &LanguageConfig) -> Self {
        let accepted = config
            .accepted_languages
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| language_code(l).unwrap_or_else(|| l.trim().to_lowercase()))
            .collect();
        Self {
            use_ai: config.use_ai,
            accepted,
        }
    }

    fn is_accepted(&self, code: &str) -> bool {
        code == UNKNOWN_LANGUAGE || self.accepted.is_empty() || self.accepted.contains(code)
    }

    fn abstract_text(record: &ManuscriptRecord) -> &str {
        let text = record.text().trim();
        if text.is_empty() {
            record.field("abstract").unwrap_or_default()
        } else {
            text
        }
    }

    async fn ai_language(
        classifier: &dyn Classifier,
        record: &ManuscriptRecord,
    ) -> Option<String> {
        let prompt = format!(
            "Title: {}\nAbstract: {}\nJournal: {}",
            record.field("title").unwrap_or_default(),
            truncate_chars(Self::abstract_text(record), ABSTRACT_PROMPT_CHARS),
            record
                .first_field(&["journal", "source_title", "source"])
                .unwrap_or_default(),
        );
        match classifier.classify(LANGUAGE_SYSTEM_PROMPT, &prompt).await {
            Ok(value) => {
                let raw = value.get("language").and_then(serde_json::Value::as_str)?;
                if raw.trim().eq_ignore_ascii_case(UNKNOWN_LANGUAGE) {
                    return Some(UNKNOWN_LANGUAGE.to_string());
                }
                let code = language_code(raw);
                if code.is_none() {
                    warn!(record_id = record.id(), language = raw, "unrecognized AI language");
                }
                code
            }
            Err(e) => {
                warn!(record_id = record.id(), error = %e, "AI language detection failed, using rules");
                None
            }
        }
    }
}

#[async_trait]
impl ScreeningStage for LanguageFilter {
    fn name(&self) -> &'static str {
        "language"
    }

    fn statistic_key(&self) -> &'static str {
        "language_excluded"
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
            let title_language = detect_language(record.field("title").unwrap_or_default());
            let abstract_language = detect_language(Self::abstract_text(record));
            let rule_language = if title_language == UNKNOWN_LANGUAGE {
                abstract_language
            } else {
                title_language
            };

            let ai_language = match classifier {
                Some(classifier) => Self::ai_language(classifier, record).await,
                None => None,
            };
            let detected = ai_language
                .clone()
                .unwrap_or_else(|| rule_language.to_string());

            record.set_tag("title_language", title_language);
            record.set_tag("abstract_language", abstract_language);
            if let Some(ai) = ai_language {
                record.set_tag("ai_detected_language", ai);
            }
            record.set_tag("detected_language", detected.clone());

            if !self.is_accepted(&detected) {
                debug!(record_id = record.id(), language = %detected, "language not accepted");
                if record.exclude(format!("Language not accepted: {detected}")) {
                    report.excluded += 1;
                }
            }
        }

        info!(excluded = report.excluded, "language filter finished");
        report
    }
}
