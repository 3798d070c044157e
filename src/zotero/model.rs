//! Zotero API response shapes.

use serde::Deserialize;
use serde_json::Value;

/// A collection's `parentCollection` field.
///
/// The API sends a key string for nested collections and `false` (or
/// nothing) for top-level ones; any other value is kept as `Unknown` and
/// never matches a parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub enum ParentKey {
    Key(String),
    #[default]
    NoParent,
    Unknown,
}

impl From<Value> for ParentKey {
    fn from(value: Value) -> Self {
        match value {
            Value::String(key) if !key.is_empty() => Self::Key(key),
            Value::String(_) | Value::Null | Value::Bool(false) => Self::NoParent,
            _ => Self::Unknown,
        }
    }
}

impl ParentKey {
    /// Whether this names `parent` (`None` meaning the library root).
    #[must_use]
    pub fn is_child_of(&self, parent: Option<&str>) -> bool {
        match self {
            Self::Key(key) => parent == Some(key.as_str()),
            Self::NoParent => parent.is_none(),
            Self::Unknown => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Collection {
    pub key: String,
    pub data: CollectionData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionData {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "parentCollection", default)]
    pub parent: ParentKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    pub data: GroupData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupData {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// An attachment item.
#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub key: String,
    #[serde(default)]
    pub data: ItemData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemData {
    pub filename: Option<String>,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
}
