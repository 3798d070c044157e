//! Downloads the file attachments of a Zotero collection.
//!
//! A collection is named by a `/`-separated path walked from the library
//! root. When the path does not resolve in the user's own library, its first
//! component is taken as a group name and the rest is walked inside that
//! group (an empty rest means the group's whole library).
//!
//! Attachments are listed in pages of [`PAGE_LIMIT`] and saved under
//! `<parent>/zotero/`. A failed file is logged and skipped.

mod error;
mod model;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::download::HttpClient;
use crate::download::constants::{DOWNLOAD_TIMEOUT_SECS, PAGE_TIMEOUT_SECS};
use crate::download::filename::sanitize_filename;

pub use error::ZoteroError;
pub use model::{Collection, CollectionData, Group, GroupData, Item, ItemData, ParentKey};

const DEFAULT_BASE_URL: &str = "https://api.zotero.org";

/// Items requested per page.
pub const PAGE_LIMIT: usize = 100;

/// Header carrying the API key.
const API_KEY_HEADER: &str = "Zotero-API-Key";

/// Subdirectory of the parent directory attachments are written to.
pub const OUTPUT_SUBDIR: &str = "zotero";

/// A user or group library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Library {
    User(String),
    Group(u64),
}

impl Library {
    fn prefix(&self) -> String {
        match self {
            Self::User(id) => format!("users/{id}"),
            Self::Group(id) => format!("groups/{id}"),
        }
    }
}

/// Counts for one collection download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoteroSummary {
    pub library: Library,
    pub attachments: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub output_dir: PathBuf,
}

/// Splits a collection path into trimmed, non-empty components.
fn path_parts(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Walks `parts` from the library root and returns the final collection key.
///
/// # Errors
///
/// - [`ZoteroError::EmptyPath`] when `parts` is empty
/// - [`ZoteroError::CollectionNotFound`] or
///   [`ZoteroError::AmbiguousCollection`] when a level has zero or several
///   matches
pub fn find_collection_key(collections: &[Collection], parts: &[&str]) -> Result<String, ZoteroError> {
    if parts.is_empty() {
        return Err(ZoteroError::EmptyPath);
    }
    let mut parent: Option<&str> = None;
    for name in parts {
        let mut matches = collections
            .iter()
            .filter(move |c| c.data.name == *name && c.data.parent.is_child_of(parent));
        let found = matches.next();
        let parent_label = parent.unwrap_or_default().to_string();
        match (found, matches.next()) {
            (None, _) => {
                return Err(ZoteroError::CollectionNotFound {
                    name: (*name).to_string(),
                    parent: parent_label,
                });
            }
            (Some(_), Some(_)) => {
                return Err(ZoteroError::AmbiguousCollection {
                    name: (*name).to_string(),
                    parent: parent_label,
                });
            }
            (Some(collection), None) => parent = Some(&collection.key),
        }
    }
    parent
        .map(str::to_string)
        .ok_or(ZoteroError::EmptyPath)
}

/// Zotero web API client.
#[derive(Clone)]
pub struct ZoteroClient {
    client: HttpClient,
    base_url: String,
    user: String,
    api_key: String,
}

impl std::fmt::Debug for ZoteroClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoteroClient")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl ZoteroClient {
    #[must_use]
    pub fn new(client: HttpClient, user: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(client, user, api_key, DEFAULT_BASE_URL)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(
        client: HttpClient,
        user: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            api_key: api_key.into(),
        }
    }

    fn get(&self, url: &str, timeout_secs: u64) -> reqwest::RequestBuilder {
        self.client
            .inner()
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(Duration::from_secs(timeout_secs))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ZoteroError> {
        debug!(api_url = %url, "Calling Zotero API");
        let response = self
            .get(url, PAGE_TIMEOUT_SECS)
            .send()
            .await
            .map_err(|e| ZoteroError::request(url, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ZoteroError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.json::<T>().await.map_err(|e| ZoteroError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Every collection in `library`.
    ///
    /// # Errors
    ///
    /// Returns [`ZoteroError`] on transport, status or decode failures.
    pub async fn collections(&self, library: &Library) -> Result<Vec<Collection>, ZoteroError> {
        let url = format!("{}/{}/collections?format=json", self.base_url, library.prefix());
        self.get_json(&url).await
    }

    /// Groups the user belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`ZoteroError`] on transport, status or decode failures.
    pub async fn groups(&self) -> Result<Vec<Group>, ZoteroError> {
        let url = format!("{}/users/{}/groups?format=json", self.base_url, self.user);
        self.get_json(&url).await
    }

    /// Attachment items of a collection, or of the whole library when
    /// `collection` is `None`, across all pages.
    ///
    /// # Errors
    ///
    /// Returns [`ZoteroError`] when any page fails.
    pub async fn attachments(
        &self,
        library: &Library,
        collection: Option<&str>,
    ) -> Result<Vec<Item>, ZoteroError> {
        let items_url = match collection {
            Some(key) => format!(
                "{}/{}/collections/{key}/items?format=json&itemType=attachment",
                self.base_url,
                library.prefix()
            ),
            None => format!(
                "{}/{}/items?format=json&itemType=attachment",
                self.base_url,
                library.prefix()
            ),
        };

        let mut items = Vec::new();
        let mut start = 0;
        loop {
            let page: Vec<Item> = self
                .get_json(&format!("{items_url}&limit={PAGE_LIMIT}&start={start}"))
                .await?;
            let count = page.len();
            items.extend(page);
            if count < PAGE_LIMIT {
                break;
            }
            start += PAGE_LIMIT;
        }
        debug!(count = items.len(), "listed attachments");
        Ok(items)
    }

    /// Saves one attachment file into `dir`. Returns the written path.
    ///
    /// The body goes to `<name>.part` first and is renamed when complete.
    ///
    /// # Errors
    ///
    /// Returns [`ZoteroError`] on transport, status or disk failures.
    pub async fn download_attachment(
        &self,
        library: &Library,
        item: &Item,
        dir: &Path,
    ) -> Result<PathBuf, ZoteroError> {
        let url = format!("{}/{}/items/{}/file", self.base_url, library.prefix(), item.key);
        let response = self
            .get(&url, DOWNLOAD_TIMEOUT_SECS)
            .send()
            .await
            .map_err(|e| ZoteroError::request(&url, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ZoteroError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let name = item
            .data
            .filename
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map_or_else(|| item.key.clone(), sanitize_filename);
        let target = dir.join(&name);
        let part = dir.join(format!("{name}.part"));

        if let Err(e) = stream_to_file(response, &url, &part).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        tokio::fs::rename(&part, &target)
            .await
            .map_err(|e| ZoteroError::io(&target, e))?;
        Ok(target)
    }

    /// Resolves `path` and downloads its attachments into
    /// `<parent_dir>/zotero`.
    ///
    /// # Errors
    ///
    /// Returns [`ZoteroError`] when the collection cannot be found or
    /// listed. Individual file failures only count toward `failed`.
    #[instrument(skip(self), fields(user = %self.user))]
    pub async fn download_collection(
        &self,
        path: &str,
        parent_dir: &Path,
    ) -> Result<ZoteroSummary, ZoteroError> {
        let parts = path_parts(path);
        if parts.is_empty() {
            return Err(ZoteroError::EmptyPath);
        }

        let (library, collection) = match self.user_collection(&parts).await {
            Ok(key) => {
                info!(collection_key = %key, "found collection in user library");
                (Library::User(self.user.clone()), Some(key))
            }
            Err(e) => {
                info!(error = %e, "not a user collection, trying group libraries");
                self.group_collection(&parts).await?
            }
        };

        let items = self.attachments(&library, collection.as_deref()).await?;
        let output_dir = parent_dir.join(OUTPUT_SUBDIR);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| ZoteroError::io(&output_dir, e))?;

        let mut downloaded = 0;
        for item in &items {
            match self.download_attachment(&library, item, &output_dir).await {
                Ok(saved) => {
                    downloaded += 1;
                    info!(path = %saved.display(), "downloaded attachment");
                }
                Err(e) => warn!(item = %item.key, error = %e, "attachment download failed"),
            }
        }

        let summary = ZoteroSummary {
            library,
            attachments: items.len(),
            downloaded,
            failed: items.len() - downloaded,
            output_dir,
        };
        info!(
            attachments = summary.attachments,
            downloaded = summary.downloaded,
            failed = summary.failed,
            "Zotero download complete"
        );
        Ok(summary)
    }

    async fn user_collection(&self, parts: &[&str]) -> Result<String, ZoteroError> {
        let collections = self.collections(&Library::User(self.user.clone())).await?;
        find_collection_key(&collections, parts)
    }

    async fn group_collection(
        &self,
        parts: &[&str],
    ) -> Result<(Library, Option<String>), ZoteroError> {
        let (group_name, rest) = parts.split_first().ok_or(ZoteroError::EmptyPath)?;
        let groups = self.groups().await?;
        for group in &groups {
            debug!(group = %group.data.name, id = group.data.id, "fetched group");
        }
        let group = groups
            .iter()
            .find(|g| g.data.name == *group_name)
            .ok_or_else(|| ZoteroError::GroupNotFound {
                name: (*group_name).to_string(),
            })?;
        let library = Library::Group(group.data.id);

        if rest.is_empty() {
            return Ok((library, None));
        }
        let collections = self.collections(&library).await?;
        let key = find_collection_key(&collections, rest)?;
        info!(group = %group.data.name, collection_key = %key, "found collection in group");
        Ok((library, Some(key)))
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<(), ZoteroError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ZoteroError::io(path, e))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ZoteroError::request(url, &e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ZoteroError::io(path, e))?;
    }
    file.flush().await.map_err(|e| ZoteroError::io(path, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    fn collection(key: &str, name: &str, parent: serde_json::Value) -> serde_json::Value {
        json!({"key": key, "data": {"key": key, "name": name, "parentCollection": parent}})
    }

    fn collections(values: &[serde_json::Value]) -> Vec<Collection> {
        serde_json::from_value(serde_json::Value::Array(values.to_vec())).unwrap()
    }

    // ==================== Path walking ====================

    #[test]
    fn test_find_nested_collection() {
        let all = collections(&[
            collection("A", "Research", json!(false)),
            collection("B", "Papers", json!("A")),
            collection("C", "Papers", json!(null)),
        ]);
        assert_eq!(find_collection_key(&all, &["Research", "Papers"]).unwrap(), "B");
        assert_eq!(find_collection_key(&all, &["Papers"]).unwrap(), "C");
    }

    #[test]
    fn test_find_collection_errors() {
        let all = collections(&[
            collection("A", "Research", json!(false)),
            collection("B", "Research", json!(false)),
        ]);
        assert!(matches!(
            find_collection_key(&all, &["Research"]),
            Err(ZoteroError::AmbiguousCollection { .. })
        ));
        let err = find_collection_key(&all, &["Missing"]).unwrap_err();
        assert!(matches!(err, ZoteroError::CollectionNotFound { .. }));
        assert!(err.to_string().contains("'Missing'"));
        assert!(matches!(
            find_collection_key(&all, &[]),
            Err(ZoteroError::EmptyPath)
        ));
    }

    #[test]
    fn test_path_parts_trims_and_drops_empty() {
        assert_eq!(path_parts(" Research / Papers/ "), vec!["Research", "Papers"]);
        assert!(path_parts("//").is_empty());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let client = ZoteroClient::new(HttpClient::new().unwrap(), "42", "secret-key");
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("REDACTED"));
    }

    // ==================== API ====================

    #[tokio::test]
    async fn test_download_user_collection_pages_and_skips_failures() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/users/42/collections"))
            .and(header("Zotero-API-Key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                collection("A", "Review", json!(false)),
            ])))
            .mount(&server)
            .await;

        let first_page: Vec<_> = (0..PAGE_LIMIT)
            .map(|i| json!({"key": format!("I{i}"), "data": {"filename": format!("f{i}.pdf")}}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/users/42/collections/A/items"))
            .and(query_param("start", "0"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first_page))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/42/collections/A/items"))
            .and(query_param("start", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"key": "LAST", "data": {"filename": "last paper.pdf"}}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/42/items/LAST/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 last".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/42/items/I0/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 zero".to_vec()))
            .mount(&server)
            .await;
        // Every other file 404s.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = ZoteroClient::with_base_url(HttpClient::new().unwrap(), "42", "k", server.uri());
        let summary = client.download_collection("Review", dir.path()).await.unwrap();

        assert_eq!(summary.library, Library::User("42".into()));
        assert_eq!(summary.attachments, PAGE_LIMIT + 1);
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, PAGE_LIMIT - 1);
        let saved = dir.path().join("zotero").join("last_paper.pdf");
        assert_eq!(std::fs::read(saved).unwrap(), b"%PDF-1.4 last");
        assert!(dir.path().join("zotero").join("f0.pdf").exists());
        assert!(!dir.path().join("zotero").join("f1.pdf.part").exists());
    }

    #[tokio::test]
    async fn test_group_fallback_uses_group_library_root() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/users/42/collections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/42/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"data": {"id": 7, "name": "Lab"}}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/groups/7/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"key": "G1", "data": {"filename": "g.pdf"}}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/groups/7/items/G1/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 g".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = ZoteroClient::with_base_url(HttpClient::new().unwrap(), "42", "k", server.uri());
        let summary = client.download_collection("Lab", dir.path()).await.unwrap();
        assert_eq!(summary.library, Library::Group(7));
        assert_eq!(summary.downloaded, 1);
        assert!(dir.path().join("zotero").join("g.pdf").exists());
    }

    #[tokio::test]
    async fn test_unknown_group_is_an_error() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/users/42/collections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/42/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = ZoteroClient::with_base_url(HttpClient::new().unwrap(), "42", "k", server.uri());
        let err = client
            .download_collection("Nowhere/Sub", Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, ZoteroError::GroupNotFound { .. }));
    }
}
