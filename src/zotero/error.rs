//! Error types for Zotero acquisition.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the Zotero web API or collection lookup.
#[derive(Debug, Error)]
pub enum ZoteroError {
    /// The request could not be sent or the body could not be read.
    #[error("Zotero request to {url} failed: {reason}")]
    Request {
        /// The API URL.
        url: String,
        /// Transport error description.
        reason: String,
    },

    /// The API answered with a non-success status.
    #[error("Zotero API returned HTTP {status} for {url}")]
    Status {
        /// The API URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response was not the expected JSON.
    #[error("unexpected Zotero response from {url}: {reason}")]
    Decode {
        /// The API URL.
        url: String,
        /// Deserialization error.
        reason: String,
    },

    /// No collection path was given.
    #[error("collection path is empty")]
    EmptyPath,

    /// No collection with this name under the parent.
    #[error("collection '{name}' not found under parent '{parent}'")]
    CollectionNotFound {
        /// Path component being matched.
        name: String,
        /// Parent collection key, empty at the library root.
        parent: String,
    },

    /// Several collections share this name under the parent.
    #[error("multiple collections named '{name}' under parent '{parent}'")]
    AmbiguousCollection {
        /// Path component being matched.
        name: String,
        /// Parent collection key, empty at the library root.
        parent: String,
    },

    /// The user is not a member of a group with this name.
    #[error("group '{name}' not found")]
    GroupNotFound {
        /// Group name from the first path component.
        name: String,
    },

    /// Local file or directory access failed.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ZoteroError {
    /// Creates a request error from a transport failure.
    #[must_use]
    pub fn request(url: impl Into<String>, error: &reqwest::Error) -> Self {
        let reason = if error.is_timeout() {
            "timed out".to_string()
        } else if error.is_connect() {
            "connection failed".to_string()
        } else {
            error.to_string()
        };
        Self::Request {
            url: url.into(),
            reason,
        }
    }

    /// Creates an IO error with its path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
