//! Manuscript records under screening.
//!
//! A [`ManuscriptRecord`] keeps the original input row (column order and
//! case preserved), the text payload the filters read, and the tags that
//! filter stages accumulate. Once a record is excluded it is frozen: later
//! tag writes and exclusions are ignored.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::trace;

/// A tag value written by a filter stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Free-form text (language codes, ids, labels).
    Str(String),
    /// Boolean flag.
    Bool(bool),
    /// Numeric score.
    Float(f64),
    /// Ordered list of labels or matched terms.
    List(Vec<String>),
    /// Per-label scores (article type scoring).
    Scores(BTreeMap<String, f64>),
}

impl TagValue {
    /// Renders the value as a single table cell.
    #[must_use]
    pub fn to_cell(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Float(f) => format!("{f:.4}"),
            Self::List(items) => items.join("; "),
            Self::Scores(scores) => serde_json::to_string(scores).unwrap_or_default(),
        }
    }

    /// Returns the string payload, if this is a string tag.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<String>> for TagValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// One bibliographic entry under screening.
#[derive(Debug, Clone)]
pub struct ManuscriptRecord {
    id: String,
    fields: Vec<(String, String)>,
    lower_index: HashMap<String, usize>,
    text: String,
    tags: BTreeMap<String, TagValue>,
    include: bool,
    exclusion_reason: Option<String>,
}

impl ManuscriptRecord {
    /// Creates an included record with no tags.
    ///
    /// `fields` keeps input column order. When two columns differ only by
    /// case, lookups resolve to the first one.
    #[must_use]
    pub fn new(id: impl Into<String>, fields: Vec<(String, String)>, text: impl Into<String>) -> Self {
        let mut lower_index = HashMap::with_capacity(fields.len());
        for (idx, (name, _)) in fields.iter().enumerate() {
            lower_index.entry(name.to_lowercase()).or_insert(idx);
        }
        Self {
            id: id.into(),
            fields,
            lower_index,
            text: text.into(),
            tags: BTreeMap::new(),
            include: true,
            exclusion_reason: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Original columns in input order.
    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Case-insensitive field lookup. Empty values count as absent.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.lower_index
            .get(&name.to_lowercase())
            .map(|&idx| self.fields[idx].1.trim())
            .filter(|value| !value.is_empty())
    }

    /// Returns the first non-empty field among `names`.
    #[must_use]
    pub fn first_field(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.field(name))
    }

    /// Non-empty fields whose lowercase column name contains any of `fragments`.
    pub fn fields_matching<'a>(
        &'a self,
        fragments: &'a [&'a str],
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.fields.iter().filter_map(move |(name, value)| {
            let lower = name.to_lowercase();
            (fragments.iter().any(|f| lower.contains(f)) && !value.trim().is_empty())
                .then_some((name.as_str(), value.trim()))
        })
    }

    /// Text payload used by content filters.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, TagValue> {
        &self.tags
    }

    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&TagValue> {
        self.tags.get(name)
    }

    #[must_use]
    pub fn is_included(&self) -> bool {
        self.include
    }

    #[must_use]
    pub fn exclusion_reason(&self) -> Option<&str> {
        self.exclusion_reason.as_deref()
    }

    /// Adds or replaces a tag. Ignored once the record is excluded.
    pub fn set_tag(&mut self, name: impl Into<String>, value: impl Into<TagValue>) {
        let name = name.into();
        if !self.include {
            trace!(record_id = %self.id, tag = %name, "ignoring tag write on excluded record");
            return;
        }
        self.tags.insert(name, value.into());
    }

    /// Excludes the record with `reason`.
    ///
    /// Returns `false` (and changes nothing) if the record was already excluded.
    pub fn exclude(&mut self, reason: impl Into<String>) -> bool {
        if !self.include {
            return false;
        }
        self.include = false;
        self.exclusion_reason = Some(reason.into());
        true
    }
}
