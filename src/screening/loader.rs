//! Loads screening input tables into [`ManuscriptRecord`]s.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use super::config::ProjectConfig;
use super::error::ScreeningError;
use crate::record::ManuscriptRecord;

/// Picks the field delimiter for `path` from its extension.
///
/// `.txt` files are sniffed: a tab in the header line means TSV.
fn detect_delimiter(path: &Path, content: &str) -> Result<u8, ScreeningError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => Ok(b','),
        "tsv" => Ok(b'\t'),
        "txt" => {
            let header = content.lines().next().unwrap_or_default();
            Ok(if header.contains('\t') { b'\t' } else { b',' })
        }
        other => Err(ScreeningError::input(
            path,
            format!("unsupported input format '.{other}' (expected .csv, .tsv or .txt)"),
        )),
    }
}

fn find_column(headers: &[String], wanted: &str) -> Option<usize> {
    let wanted = wanted.trim();
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(wanted))
}

/// Replaces a path-like text value with the file's contents.
fn resolve_text_payload(value: &str, base_dir: &Path, record_id: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains('\n') || trimmed.len() > 4096 {
        return value.to_string();
    }
    let candidate = PathBuf::from(trimmed);
    let candidate = if candidate.is_relative() {
        base_dir.join(candidate)
    } else {
        candidate
    };
    if !candidate.is_file() {
        return value.to_string();
    }
    match std::fs::read_to_string(&candidate) {
        Ok(content) => {
            debug!(record_id, path = %candidate.display(), "loaded text payload from file");
            content
        }
        Err(e) => {
            warn!(
                record_id,
                path = %candidate.display(),
                error = %e,
                "text payload file is not readable as text, keeping path"
            );
            value.to_string()
        }
    }
}

/// Reads the project input file into records.
///
/// Ids come from `identifier_column` when configured (blank cells fall back
/// to the 1-based row number, repeated values get a `#<row>` suffix) and
/// from row numbers otherwise.
///
/// # Errors
///
/// Returns [`ScreeningError`] when the file is unreadable, has an
/// unsupported extension, or lacks the text or identifier column.
#[instrument(skip(project), fields(path = %project.input_file.display()))]
pub fn load_records(project: &ProjectConfig) -> Result<Vec<ManuscriptRecord>, ScreeningError> {
    let path = &project.input_file;
    let content =
        std::fs::read_to_string(path).map_err(|source| ScreeningError::io(path, source))?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    let delimiter = detect_delimiter(path, content)?;

    // Tab-separated exports split on literal tabs; quotes are data there.
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .quoting(delimiter != b'\t')
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ScreeningError::csv(path, e))?
        .iter()
        .map(str::to_string)
        .collect();

    let text_idx = find_column(&headers, &project.text_column).ok_or_else(|| {
        ScreeningError::input(
            path,
            format!("text column '{}' not found", project.text_column),
        )
    })?;

    let id_idx = if project.identifier_column.trim().is_empty() {
        None
    } else {
        Some(
            find_column(&headers, &project.identifier_column).ok_or_else(|| {
                ScreeningError::input(
                    path,
                    format!(
                        "identifier column '{}' not found",
                        project.identifier_column
                    ),
                )
            })?,
        )
    };

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut seen_ids = HashSet::new();
    let mut records = Vec::new();

    for (row_idx, row) in reader.records().enumerate() {
        let row = row.map_err(|e| ScreeningError::csv(path, e))?;
        let row_number = row_idx + 1;
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let fields: Vec<(String, String)> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), row.get(i).unwrap_or_default().to_string()))
            .collect();

        let mut id = id_idx
            .and_then(|i| row.get(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map_or_else(|| row_number.to_string(), str::to_string);
        if !seen_ids.insert(id.clone()) {
            warn!(record_id = %id, row = row_number, "duplicate record id, appending row number");
            id = format!("{id}#{row_number}");
            seen_ids.insert(id.clone());
        }

        let raw_text = row.get(text_idx).unwrap_or_default();
        let text = resolve_text_payload(raw_text, base_dir, &id);
        records.push(ManuscriptRecord::new(id, fields, text));
    }

    info!(records = records.len(), "loaded screening input");
    Ok(records)
}
