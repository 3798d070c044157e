//! Acquisition input parsing.
//!
//! Two input shapes are accepted:
//!
//! - Plain-text URL lists: one locator per line, `#` comments and blank
//!   lines ignored
//! - CSV/TSV tables with a header row: URL, DOI, title, authors, year,
//!   journal and abstract columns are detected from header names, and the
//!   journal column is validated against sample rows
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use sift_core::parser::{parse_table, parse_url_list};
//!
//! let urls = parse_url_list("# exported list\nhttps://example.com/paper.pdf\n");
//! assert_eq!(urls.len(), 1);
//!
//! let table = parse_table(Path::new("papers.csv"), "Title,DOI\nSoil,10.1/x\n").unwrap();
//! assert_eq!(table.columns.doi, Some(1));
//! ```

mod error;
mod table;
mod url_list;

pub use error::{MAX_URL_LENGTH, ParseError};
pub use table::{
    ColumnContent, ColumnMap, PaperRow, PaperTable, SAMPLE_ROWS, analyze_journal_column,
    parse_table, read_table, sniff_delimiter,
};
pub use url_list::{parse_url_list, read_url_list, validate_url};

use std::path::Path;

/// Shape of an acquisition input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    UrlList,
    Table,
}

impl InputKind {
    /// `.csv` and `.tsv` are tables; everything else is a URL list.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("csv" | "tsv") => Self::Table,
            _ => Self::UrlList,
        }
    }
}
