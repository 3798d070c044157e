//! CSV/TSV paper tables with header-driven column detection.
//!
//! Columns are found by header substrings, case-insensitively. A detected
//! journal column is then checked against up to [`SAMPLE_ROWS`] data rows,
//! since exports often label the source *database* (Scopus, `WoS`) with a
//! header such as `Source`.

use std::path::Path;

use tracing::{debug, info, instrument, warn};

use super::error::ParseError;
use crate::download::TaskMetadata;
use crate::download::filename::metadata_filename;

/// Data rows inspected when validating the journal column.
pub const SAMPLE_ROWS: usize = 5;

/// URL headers that win over any generic URL/link column.
const BEST_URL_NAMES: [&str; 4] = ["bestlink", "besturl", "best_link", "best_url"];

/// Journal headers that always win.
const STRONG_JOURNAL_NAMES: [&str; 6] = [
    "sourcetitle",
    "source_title",
    "publication_title",
    "publicationtitle",
    "journaltitle",
    "journal_title",
];

const JOURNAL_WORDS: [&str; 7] = [
    "journal",
    "proceedings",
    "conference",
    "review",
    "nature",
    "science",
    "plos",
];

const DATABASE_WORDS: [&str; 8] = [
    "scopus",
    "pubmed",
    "crossref",
    "wos",
    "web of science",
    "google scholar",
    "dimensions",
    "semantic scholar",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

// ==================== Column detection ====================

/// Indexes of the recognized columns of a paper table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub url: Option<usize>,
    pub doi: Option<usize>,
    pub title: Option<usize>,
    pub authors: Option<usize>,
    pub year: Option<usize>,
    pub journal: Option<usize>,
    pub abstract_text: Option<usize>,
}

impl ColumnMap {
    /// Detects columns from header names alone.
    #[must_use]
    pub fn from_headers(headers: &[String]) -> Self {
        let mut map = Self::default();
        for (i, header) in headers.iter().enumerate() {
            let h = header.trim().to_lowercase();

            if contains_any(&h, &BEST_URL_NAMES) {
                map.url = Some(i);
            } else if map.url.is_none() && contains_any(&h, &["url", "link", "href"]) {
                map.url = Some(i);
            }

            if map.doi.is_none() && contains_any(&h, &["doi", "digital object identifier"]) {
                map.doi = Some(i);
            }

            if map.title.is_none()
                && h.contains("title")
                && !h.contains("source")
                && !h.contains("journal")
            {
                map.title = Some(i);
            }

            if map.authors.is_none() && contains_any(&h, &["author", "creator", "contributor"]) {
                map.authors = Some(i);
            }

            // Checked before journal so "publicationyear" is a year, not a venue.
            if map.year.is_none() && (h.contains("year") || (h.contains("date") && h.contains("publ")))
            {
                map.year = Some(i);
            }

            if contains_any(&h, &STRONG_JOURNAL_NAMES) {
                map.journal = Some(i);
            } else if map.journal.is_none()
                && (contains_any(&h, &["journal", "venue"])
                    || (h.contains("publication") && !h.contains("year") && !h.contains("date"))
                    || h.contains("source"))
            {
                map.journal = Some(i);
            }

            if map.abstract_text.is_none() && h.contains("abstract") {
                map.abstract_text = Some(i);
            }
        }
        map
    }

    /// Detects columns from headers, then validates the journal column
    /// against sample rows.
    ///
    /// A database-like journal column is swapped for the first other
    /// journal-named column whose content is not database-like; with no
    /// such column the original stays.
    #[must_use]
    pub fn detect(headers: &[String], samples: &[Vec<String>]) -> Self {
        let mut map = Self::from_headers(headers);
        let Some(journal) = map.journal else {
            return map;
        };
        if samples.is_empty() {
            return map;
        }

        let content = analyze_journal_column(column_values(samples, journal));
        if content != ColumnContent::LikelyDatabase {
            debug!(column = %headers[journal], content = content.as_str(), "journal column confirmed");
            return map;
        }

        info!(
            column = %headers[journal],
            "journal column looks like a source database, searching for a better one"
        );
        let better = headers.iter().enumerate().find_map(|(i, header)| {
            if i == journal {
                return None;
            }
            let h = header.trim().to_lowercase();
            let named = contains_any(&h, &STRONG_JOURNAL_NAMES)
                || (h.contains("title") && contains_any(&h, &["source", "journal", "publication"]));
            if !named {
                return None;
            }
            let candidate = analyze_journal_column(column_values(samples, i));
            (candidate.is_journal() || candidate != ColumnContent::LikelyDatabase).then(|| {
                info!(column = %header, content = candidate.as_str(), "found better journal column");
                i
            })
        });

        match better {
            Some(i) => map.journal = Some(i),
            None => {
                info!(column = %headers[journal], "no better journal column, keeping it");
            }
        }
        map
    }

    /// True when rows can be located by URL or DOI.
    #[must_use]
    pub fn has_locator(&self) -> bool {
        self.url.is_some() || self.doi.is_some()
    }
}

fn column_values(rows: &[Vec<String>], index: usize) -> impl Iterator<Item = &str> {
    rows.iter().filter_map(move |row| row.get(index).map(String::as_str))
}

/// What the values of a candidate journal column look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnContent {
    LikelyJournal,
    LikelyDatabase,
    /// Neither ratio is decisive; `journal_like` compares the two.
    Unclear { journal_like: bool },
    /// No non-empty values.
    Empty,
}

impl ColumnContent {
    #[must_use]
    pub fn is_journal(self) -> bool {
        matches!(
            self,
            Self::LikelyJournal | Self::Unclear { journal_like: true }
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LikelyJournal => "likely_journal",
            Self::LikelyDatabase => "likely_database",
            Self::Unclear { .. } => "unclear",
            Self::Empty => "empty",
        }
    }
}

/// Classifies column values as journal names or source-database labels.
#[allow(clippy::cast_precision_loss)]
pub fn analyze_journal_column<'a>(values: impl IntoIterator<Item = &'a str>) -> ColumnContent {
    let mut journal = 0usize;
    let mut database = 0usize;
    let mut non_empty = 0usize;

    for value in values {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        non_empty += 1;
        let lower = value.to_lowercase();
        let words = value.split_whitespace().count();

        if contains_any(&lower, &JOURNAL_WORDS) || words > 2 {
            journal += 1;
        }
        if contains_any(&lower, &DATABASE_WORDS) || (words == 1 && value.len() < 15) {
            database += 1;
        }
    }

    if non_empty == 0 {
        return ColumnContent::Empty;
    }
    let journal_ratio = journal as f64 / non_empty as f64;
    let database_ratio = database as f64 / non_empty as f64;

    if journal_ratio > 0.3 && database_ratio < 0.2 {
        ColumnContent::LikelyJournal
    } else if database_ratio > 0.3 {
        ColumnContent::LikelyDatabase
    } else {
        ColumnContent::Unclear {
            journal_like: journal_ratio > database_ratio,
        }
    }
}

// ==================== Rows and tables ====================

/// One data row with its recognized fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaperRow {
    /// 1-based position among the parsed data rows.
    pub id: String,
    /// Original cells, for the enhanced report.
    pub cells: Vec<String>,
    pub url: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub year: Option<String>,
    pub journal: Option<String>,
    pub abstract_text: Option<String>,
}

impl PaperRow {
    fn from_cells(id: usize, cells: Vec<String>, columns: &ColumnMap) -> Self {
        let cell = |index: Option<usize>| {
            index
                .and_then(|i| cells.get(i))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            id: id.to_string(),
            url: cell(columns.url),
            doi: cell(columns.doi),
            title: cell(columns.title),
            authors: cell(columns.authors),
            year: cell(columns.year),
            journal: cell(columns.journal),
            abstract_text: cell(columns.abstract_text),
            cells,
        }
    }

    /// Bibliographic fields handed to the download task.
    #[must_use]
    pub fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            title: self.title.clone(),
            authors: self.authors.clone(),
            year: self.year.clone(),
            doi: self.doi.clone(),
        }
    }

    /// `{year}_{firstAuthorLast}_{title}.pdf`, or `paper_<id>.pdf`.
    #[must_use]
    pub fn filename(&self) -> String {
        metadata_filename(
            self.year.as_deref(),
            self.authors.as_deref(),
            self.title.as_deref(),
            &self.id,
        )
    }
}

/// A parsed acquisition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperTable {
    /// Header names as written.
    pub headers: Vec<String>,
    /// Field delimiter, reused for the report.
    pub delimiter: u8,
    pub columns: ColumnMap,
    pub rows: Vec<PaperRow>,
}

/// Tab when the header line has more tabs than commas, else comma.
#[must_use]
pub fn sniff_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or_default();
    let tabs = header.matches('\t').count();
    let commas = header.matches(',').count();
    if tabs > commas { b'\t' } else { b',' }
}

/// Parses table `content`; `path` is only used in errors and logs.
///
/// Malformed data rows are logged and skipped. Rows without a URL or DOI
/// are kept so they still get a report line.
///
/// # Errors
///
/// - [`ParseError::MissingHeader`] for empty input
/// - [`ParseError::NoLocatorColumn`] when no URL or DOI column exists
#[instrument(skip(content), fields(path = %path.display()))]
pub fn parse_table(path: &Path, content: &str) -> Result<PaperTable, ParseError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let delimiter = sniff_delimiter(content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .quoting(delimiter != b'\t')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|source| ParseError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(ParseError::MissingHeader {
            path: path.to_path_buf(),
        });
    }

    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    for (line, record) in reader.records().enumerate() {
        match record {
            Ok(record) => raw_rows.push(record.iter().map(str::to_string).collect()),
            Err(e) => warn!(row = line + 1, error = %e, "skipping unreadable row"),
        }
    }

    let sample_end = raw_rows.len().min(SAMPLE_ROWS);
    let columns = ColumnMap::detect(&headers, &raw_rows[..sample_end]);
    if !columns.has_locator() {
        return Err(ParseError::NoLocatorColumn {
            path: path.to_path_buf(),
        });
    }
    debug!(?columns, "detected columns");

    let rows = raw_rows
        .into_iter()
        .enumerate()
        .map(|(i, cells)| PaperRow::from_cells(i + 1, cells, &columns))
        .collect::<Vec<_>>();
    info!(rows = rows.len(), delimiter = %char::from(delimiter).escape_default(), "parsed paper table");

    Ok(PaperTable {
        headers,
        delimiter,
        columns,
        rows,
    })
}

/// Reads and parses a CSV/TSV table from disk.
///
/// # Errors
///
/// Returns [`ParseError::Io`] if the file cannot be read, otherwise as
/// [`parse_table`].
pub fn read_table(path: &Path) -> Result<PaperTable, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|e| ParseError::io(path, e))?;
    parse_table(path, &content)
}
