//! PyPI JSON API client.
//!
//! Two documents per project are used: `<index>/<name>/json` for the release
//! list and `<index>/<name>/<version>/json` for that release's
//! `requires_dist` and distribution files.

use super::normalize_name;
use super::requirements::manifest_from_requires_dist;
use super::version::SpecifierSet;
use crate::mirror::source::RegistrySource;
use crate::pkg::error::PkgError;
use crate::pkg::manifest::PackageManifest;
use crate::pkg::registry::{http_client, parse_base_url, DEFAULT_REQUEST_TIMEOUT};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

/// Default PyPI JSON API root.
pub const DEFAULT_INDEX: &str = "https://pypi.org/pypi/";

/// Environment variable to override the index URL.
pub const INDEX_ENV: &str = "PKGMIRROR_PYPI_INDEX";

type DocumentSlot = Arc<OnceCell<Arc<Value>>>;

/// One downloadable file of a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseFile {
    pub filename: String,
    pub url: String,
    /// `bdist_wheel` or `sdist`.
    #[serde(default)]
    pub packagetype: String,
    #[serde(default)]
    pub yanked: bool,
}

impl ReleaseFile {
    #[must_use]
    pub fn is_sdist(&self) -> bool {
        self.packagetype == "sdist"
            || self.filename.ends_with(".tar.gz")
            || self.filename.ends_with(".zip")
    }
}

/// Client for a PyPI-compatible JSON API.
///
/// Documents are cached per URL path for the lifetime of the client.
#[derive(Debug, Clone)]
pub struct PypiClient {
    base_url: Url,
    http: Client,
    documents: Arc<Mutex<HashMap<String, DocumentSlot>>>,
}

impl PypiClient {
    /// # Errors
    /// Returns a `PKG_REGISTRY_CONFIG` error if the URL is invalid or the
    /// HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// # Errors
    /// Returns a `PKG_REGISTRY_CONFIG` error if the URL is invalid or the
    /// HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, PkgError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            http: http_client(timeout)?,
            documents: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// The project document (release list).
    ///
    /// # Errors
    /// `PKG_NOT_FOUND` for an unknown project, or a transport error.
    pub async fn project(&self, name: &str) -> Result<Arc<Value>, PkgError> {
        let name = normalize_name(name);
        self.document(format!("{name}/json"), || PkgError::not_found(&name))
            .await
    }

    /// The release document (metadata and files of one version).
    ///
    /// # Errors
    /// `PKG_VERSION_NOT_FOUND` for an unknown release, or a transport error.
    pub async fn release(&self, name: &str, version: &str) -> Result<Arc<Value>, PkgError> {
        let name = normalize_name(name);
        self.document(format!("{name}/{version}/json"), || {
            PkgError::version_not_found(&name, version)
        })
        .await
    }

    /// Distribution files of one release.
    ///
    /// # Errors
    /// As [`PypiClient::release`], or `PKG_REGISTRY_ERROR` when the file list
    /// is malformed.
    pub async fn release_files(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<ReleaseFile>, PkgError> {
        let release = self.release(name, version).await?;
        let urls = release.get("urls").cloned().unwrap_or(Value::Null);
        if urls.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(urls).map_err(|e| {
            PkgError::registry(format!("Malformed file list for {name}@{version}: {e}"))
        })
    }

    async fn document(
        &self,
        path: String,
        missing: impl FnOnce() -> PkgError,
    ) -> Result<Arc<Value>, PkgError> {
        let slot = {
            let mut slots = self
                .documents
                .lock()
                .map_err(|_| PkgError::registry("document cache poisoned"))?;
            slots.entry(path.clone()).or_default().clone()
        };

        slot.get_or_try_init(|| async move {
            match self.fetch_json(&path).await? {
                Some(value) => Ok(Arc::new(value)),
                None => Err(missing()),
            }
        })
        .await
        .cloned()
    }

    /// `Ok(None)` on 404.
    async fn fetch_json(&self, path: &str) -> Result<Option<Value>, PkgError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{path}': {e}")))?;

        debug!(url = %url, "fetching pypi document");

        let response = self.http.get(url.as_str()).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let transient = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
            return Err(
                PkgError::registry(format!("Index returned status {status} for '{path}'"))
                    .with_transient(transient),
            );
        }

        Ok(Some(response.json().await?))
    }
}

/// Versions with at least one file that has not been yanked.
#[must_use]
pub fn installable_versions(project: &Value) -> Vec<&str> {
    let Some(releases) = project.get("releases").and_then(Value::as_object) else {
        return Vec::new();
    };
    releases
        .iter()
        .filter(|(_, files)| {
            files.as_array().is_some_and(|files| {
                files
                    .iter()
                    .any(|f| !f.get("yanked").and_then(Value::as_bool).unwrap_or(false))
            })
        })
        .map(|(version, _)| version.as_str())
        .collect()
}

#[async_trait]
impl RegistrySource for PypiClient {
    async fn resolve_version(&self, name: &str, range: &str) -> Result<String, PkgError> {
        let specifiers = SpecifierSet::parse(range)?;
        let project = self.project(name).await?;
        specifiers
            .select(installable_versions(&project))
            .map(String::from)
            .ok_or_else(|| PkgError::version_not_found(name, range))
    }

    async fn fetch_manifest(&self, name: &str, version: &str) -> Result<PackageManifest, PkgError> {
        let release = self.release(name, version).await?;
        let info = release.get("info");
        let requires = info
            .and_then(|i| i.get("requires_dist"))
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).collect::<Vec<_>>())
            .unwrap_or_default();

        Ok(manifest_from_requires_dist(
            Some(name),
            Some(version),
            requires,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::codes;
    use serde_json::json;

    #[test]
    fn test_installable_versions_skip_empty_and_yanked() {
        let project = json!({
            "releases": {
                "1.0": [{ "filename": "a-1.0.tar.gz", "yanked": false }],
                "1.1": [{ "filename": "a-1.1.tar.gz", "yanked": true }],
                "1.2": [],
                "2.0": [
                    { "filename": "a-2.0.tar.gz", "yanked": true },
                    { "filename": "a-2.0-py3-none-any.whl" }
                ]
            }
        });

        let mut versions = installable_versions(&project);
        versions.sort_unstable();
        assert_eq!(versions, vec!["1.0", "2.0"]);
    }

    #[test]
    fn test_release_file_kinds() {
        let files: Vec<ReleaseFile> = serde_json::from_value(json!([
            { "filename": "six-1.16.0-py2.py3-none-any.whl", "url": "u1", "packagetype": "bdist_wheel" },
            { "filename": "six-1.16.0.tar.gz", "url": "u2", "packagetype": "sdist", "yanked": false }
        ]))
        .unwrap();

        assert!(!files[0].is_sdist());
        assert!(files[1].is_sdist());
    }

    #[test]
    fn test_invalid_index_url() {
        let err = PypiClient::new("::nope").unwrap_err();
        assert_eq!(err.code(), codes::PKG_REGISTRY_CONFIG);
    }

    #[tokio::test]
    async fn test_unreachable_index_is_transient() {
        let client = PypiClient::with_timeout("http://127.0.0.1:9/pypi", Duration::from_secs(2))
            .unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:9/pypi/");
        let err = client.project("requests").await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
