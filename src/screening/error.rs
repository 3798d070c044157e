//! Error types for screening runs.

use std::path::PathBuf;

use thiserror::Error;

/// Structural problems with a screening configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// The TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// A required `[project]` key is missing or empty.
    #[error("missing required config field `{field}`")]
    MissingField {
        /// Dotted field name, e.g. `project.text_column`.
        field: &'static str,
    },

    /// Every filter is disabled.
    #[error("no screening filter is enabled")]
    NoFilterEnabled,

    /// A value is outside its allowed range.
    #[error("invalid config value for `{field}`: {reason}")]
    InvalidValue {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Errors that abort a screening run.
///
/// Per-record filter failures never surface here; they are logged and the
/// record passes through the stage.
#[derive(Debug, Error)]
pub enum ScreeningError {
    /// Configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Input table exists but cannot be used.
    #[error("invalid input {path}: {reason}")]
    Input {
        /// Input file path.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },

    /// Input or output file access failed.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// CSV reading or writing failed.
    #[error("CSV error on {path}: {source}")]
    Csv {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying CSV error.
        #[source]
        source: csv::Error,
    },

    /// JSON output could not be produced.
    #[error("JSON error on {path}: {source}")]
    Json {
        /// Output path.
        path: PathBuf,
        /// The underlying serialization error.
        #[source]
        source: serde_json::Error,
    },
}

impl ScreeningError {
    /// Creates an input error.
    pub fn input(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Input {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a CSV error.
    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}
