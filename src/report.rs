//! Output writers for screening results and download reports.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::record::{ManuscriptRecord, TagValue};
use crate::screening::{OutputFormat, STATISTIC_KEYS, ScreeningError, ScreeningResult};

/// Prefix of tag columns in screening CSV output.
pub const TAG_COLUMN_PREFIX: &str = "tag_";

// ==================== Screening output ====================

#[derive(Serialize)]
struct JsonRecord<'a> {
    id: &'a str,
    /// Input columns in file order.
    original_data: IndexMap<&'a str, &'a str>,
    tags: &'a BTreeMap<String, TagValue>,
    include: bool,
    exclusion_reason: &'a str,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    total_records: usize,
    included_records: usize,
    excluded_records: usize,
    statistics: IndexMap<&'a str, usize>,
    records: Vec<JsonRecord<'a>>,
}

/// Original columns in first-seen order across all records.
fn original_columns(records: &[ManuscriptRecord]) -> Vec<&str> {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for (name, _) in record.fields() {
            if !columns.contains(&name.as_str()) {
                columns.push(name);
            }
        }
    }
    columns
}

fn tag_names(records: &[ManuscriptRecord]) -> BTreeSet<&str> {
    records
        .iter()
        .flat_map(|r| r.tags().keys().map(String::as_str))
        .collect()
}

fn raw_field<'a>(record: &'a ManuscriptRecord, column: &str) -> &'a str {
    record
        .fields()
        .iter()
        .find(|(name, _)| name == column)
        .map_or("", |(_, value)| value.as_str())
}

/// Writes the screening table as CSV.
///
/// # Errors
///
/// Returns [`ScreeningError::Csv`] if the file cannot be written.
pub fn write_screening_csv(result: &ScreeningResult, path: &Path) -> Result<(), ScreeningError> {
    let columns = original_columns(&result.records);
    let tags = tag_names(&result.records);

    let mut writer = csv::Writer::from_path(path).map_err(|e| ScreeningError::csv(path, e))?;
    let header = columns
        .iter()
        .map(|c| (*c).to_string())
        .chain(tags.iter().map(|t| format!("{TAG_COLUMN_PREFIX}{t}")))
        .chain(["include".to_string(), "exclusion_reason".to_string()]);
    writer
        .write_record(header)
        .map_err(|e| ScreeningError::csv(path, e))?;

    for record in &result.records {
        let row = columns
            .iter()
            .map(|c| raw_field(record, c).to_string())
            .chain(
                tags.iter()
                    .map(|t| record.tag(t).map(TagValue::to_cell).unwrap_or_default()),
            )
            .chain([
                record.is_included().to_string(),
                record.exclusion_reason().unwrap_or_default().to_string(),
            ]);
        writer
            .write_record(row)
            .map_err(|e| ScreeningError::csv(path, e))?;
    }
    writer
        .flush()
        .map_err(|e| ScreeningError::io(path, e))?;
    Ok(())
}

/// Writes the screening result as pretty-printed JSON with aggregate counts.
///
/// # Errors
///
/// Returns [`ScreeningError`] if serialization or the write fails.
pub fn write_screening_json(result: &ScreeningResult, path: &Path) -> Result<(), ScreeningError> {
    let statistics = STATISTIC_KEYS
        .iter()
        .map(|k| (*k, result.statistics.get(*k).copied().unwrap_or_default()))
        .collect();
    let report = JsonReport {
        total_records: result.total(),
        included_records: result.included_count(),
        excluded_records: result.excluded_count(),
        statistics,
        records: result
            .records
            .iter()
            .map(|r| JsonRecord {
                id: r.id(),
                original_data: r
                    .fields()
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect(),
                tags: r.tags(),
                include: r.is_included(),
                exclusion_reason: r.exclusion_reason().unwrap_or_default(),
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&report).map_err(|source| ScreeningError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(|e| ScreeningError::io(path, e))
}

/// Writes `result` in `format`.
///
/// # Errors
///
/// Returns [`ScreeningError`] if the output cannot be written.
#[instrument(skip(result), fields(path = %path.display()))]
pub fn write_screening_output(
    result: &ScreeningResult,
    path: &Path,
    format: OutputFormat,
) -> Result<(), ScreeningError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ScreeningError::io(parent, e))?;
    }
    match format {
        OutputFormat::Csv => write_screening_csv(result, path)?,
        OutputFormat::Json => write_screening_json(result, path)?,
    }
    debug!(records = result.total(), ?format, "wrote screening output");
    Ok(())
}

// ==================== Download reports ====================

/// Outcome columns appended to every download report row.
pub const DOWNLOAD_COLUMNS: [&str; 3] = ["downloaded", "error_reason", "filename"];

/// One reported acquisition outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReportRow {
    pub downloaded: bool,
    /// Empty on success.
    pub error_reason: String,
    /// Empty on failure.
    pub filename: String,
}

impl DownloadReportRow {
    #[must_use]
    pub fn success(filename: impl Into<String>) -> Self {
        Self {
            downloaded: true,
            error_reason: String::new(),
            filename: filename.into(),
        }
    }

    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            downloaded: false,
            error_reason: reason.into(),
            filename: String::new(),
        }
    }

    fn cells(&self) -> [String; 3] {
        [
            self.downloaded.to_string(),
            self.error_reason.clone(),
            self.filename.clone(),
        ]
    }
}

/// Writes the URL-list report: `url,downloaded,error_reason,filename`.
///
/// # Errors
///
/// Returns [`csv::Error`] if the file cannot be written.
pub fn write_url_report(path: &Path, rows: &[(String, DownloadReportRow)]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(std::iter::once("url").chain(DOWNLOAD_COLUMNS))?;
    for (url, row) in rows {
        let [downloaded, reason, filename] = row.cells();
        writer.write_record([url.as_str(), downloaded.as_str(), reason.as_str(), filename.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the original table with the outcome columns appended.
///
/// `rows` pairs each original row (cells in `headers` order) with its outcome.
///
/// # Errors
///
/// Returns [`csv::Error`] if the file cannot be written.
pub fn write_table_report(
    path: &Path,
    delimiter: u8,
    headers: &[String],
    rows: &[(Vec<String>, DownloadReportRow)],
) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;
    writer.write_record(
        headers
            .iter()
            .map(String::as_str)
            .chain(DOWNLOAD_COLUMNS),
    )?;
    for (cells, outcome) in rows {
        let mut record: Vec<String> = cells.clone();
        record.resize(headers.len(), String::new());
        record.extend(outcome.cells());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
