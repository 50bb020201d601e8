//! npm registry client.

use super::error::PkgError;
use super::manifest::PackageManifest;
use super::version::resolve_version;
use crate::mirror::source::RegistrySource;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable to override registry URL.
pub const REGISTRY_ENV: &str = "PKGMIRROR_NPM_REGISTRY";

/// Default per-request timeout.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type PackumentSlot = Arc<OnceCell<Arc<Value>>>;

/// Registry client for fetching package metadata.
///
/// Packuments are cached per package name for the lifetime of the client,
/// so resolving many ranges of one package costs a single request.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
    packuments: Arc<Mutex<HashMap<String, PackumentSlot>>>,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL.
    ///
    /// # Errors
    /// Returns a `PKG_REGISTRY_CONFIG` error if the URL is invalid or the
    /// HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client whose requests give up after `timeout`.
    ///
    /// # Errors
    /// Returns a `PKG_REGISTRY_CONFIG` error if the URL is invalid or the
    /// HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, PkgError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            http: http_client(timeout)?,
            packuments: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Create a client using the registry URL from environment or default.
    ///
    /// # Errors
    /// Returns an error if the client cannot be created.
    pub fn from_env() -> Result<Self, PkgError> {
        let url = std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string());
        Self::new(&url)
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the HTTP client (for reuse in tarball downloads).
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Fetch the packument for a package, reusing an earlier response.
    ///
    /// Concurrent callers for the same name share one request. Failures are
    /// not cached, so a retry issues a fresh request.
    ///
    /// # Errors
    /// Returns an error if the request fails or the package is not found.
    pub async fn packument(&self, name: &str) -> Result<Arc<Value>, PkgError> {
        let slot = {
            let mut slots = self
                .packuments
                .lock()
                .map_err(|_| PkgError::registry("packument cache poisoned"))?;
            slots.entry(name.to_string()).or_default().clone()
        };

        slot.get_or_try_init(|| async { self.fetch_packument(name).await.map(Arc::new) })
            .await
            .cloned()
    }

    /// Fetch the packument (package metadata) for a package.
    ///
    /// # Errors
    /// Returns an error if the request fails or the package is not found.
    pub async fn fetch_packument(&self, name: &str) -> Result<Value, PkgError> {
        // URL-encode the name for scoped packages
        let encoded_name = if name.starts_with('@') {
            name.replace('/', "%2F")
        } else {
            name.to_string()
        };

        let url = self
            .base_url
            .join(&encoded_name)
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))?;

        debug!(name, url = %url, "fetching packument");

        let response = self.http.get(url.as_str()).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(PkgError::not_found(name));
        }

        if !status.is_success() {
            let transient = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
            return Err(
                PkgError::registry(format!("Registry returned status {status} for '{name}'"))
                    .with_transient(transient),
            );
        }

        let json: Value = response.json().await?;
        Ok(json)
    }
}

#[async_trait]
impl RegistrySource for RegistryClient {
    async fn resolve_version(&self, name: &str, range: &str) -> Result<String, PkgError> {
        let packument = self.packument(name).await?;
        resolve_version(&packument, range)
    }

    async fn fetch_manifest(&self, name: &str, version: &str) -> Result<PackageManifest, PkgError> {
        let packument = self.packument(name).await?;
        let entry = packument
            .get("versions")
            .and_then(|v| v.get(version))
            .ok_or_else(|| PkgError::version_not_found(name, version))?;
        PackageManifest::from_value(entry)
    }
}

/// Parse a base URL, making sure relative joins stay under its path.
pub(crate) fn parse_base_url(base_url: &str) -> Result<Url, PkgError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| PkgError::registry_config(format!("Invalid registry URL '{base_url}': {e}")))?;

    if url.cannot_be_a_base() {
        return Err(PkgError::registry_config(format!(
            "Registry URL '{base_url}' cannot be used as a base"
        )));
    }

    // Url::join drops the last segment without a trailing slash
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// HTTP client shared by the registry backends.
pub(crate) fn http_client(timeout: Duration) -> Result<Client, PkgError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .user_agent(concat!("pkgmirror/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PkgError::registry_config(format!("Failed to create HTTP client: {e}")))
}

/// Extract the latest version from a packument.
#[must_use]
pub fn get_latest_version(packument: &Value) -> Option<&str> {
    get_dist_tag(packument, "latest")
}

/// Look up a dist-tag (`latest`, `next`, ...).
#[must_use]
pub fn get_dist_tag<'a>(packument: &'a Value, tag: &str) -> Option<&'a str> {
    packument.get("dist-tags")?.get(tag)?.as_str()
}

/// Extract the tarball URL for a specific version.
#[must_use]
pub fn get_tarball_url<'a>(packument: &'a Value, version: &str) -> Option<&'a str> {
    packument
        .get("versions")?
        .get(version)?
        .get("dist")?
        .get("tarball")?
        .as_str()
}

/// Get all available version strings from a packument.
#[must_use]
pub fn get_versions(packument: &Value) -> Vec<&str> {
    packument
        .get("versions")
        .and_then(|v| v.as_object())
        .map(|obj| obj.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::codes;
    use serial_test::serial;

    #[test]
    fn test_dist_tags() {
        let packument = serde_json::json!({
            "name": "react",
            "dist-tags": {
                "latest": "18.2.0",
                "next": "19.0.0-rc.0"
            }
        });

        assert_eq!(get_latest_version(&packument), Some("18.2.0"));
        assert_eq!(get_dist_tag(&packument, "next"), Some("19.0.0-rc.0"));
        assert_eq!(get_dist_tag(&packument, "beta"), None);
    }

    #[test]
    fn test_get_tarball_url() {
        let packument = serde_json::json!({
            "name": "react",
            "versions": {
                "18.2.0": {
                    "dist": {
                        "tarball": "https://registry.npmjs.org/react/-/react-18.2.0.tgz",
                        "shasum": "abc123"
                    }
                }
            }
        });

        assert_eq!(
            get_tarball_url(&packument, "18.2.0"),
            Some("https://registry.npmjs.org/react/-/react-18.2.0.tgz")
        );
        assert_eq!(get_tarball_url(&packument, "17.0.0"), None);
    }

    #[test]
    fn test_get_versions() {
        let packument = serde_json::json!({
            "versions": { "18.2.0": {}, "18.1.0": {}, "17.0.2": {} }
        });

        let versions = get_versions(&packument);
        assert_eq!(versions.len(), 3);
        assert!(versions.contains(&"18.1.0"));
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = RegistryClient::new("http://localhost:4873/npm").unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:4873/npm/");
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = RegistryClient::new("not-a-url").unwrap_err();
        assert_eq!(err.code(), codes::PKG_REGISTRY_CONFIG);
        assert!(err.is_fatal());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var(REGISTRY_ENV, "http://127.0.0.1:9/");
        let client = RegistryClient::from_env().unwrap();
        std::env::remove_var(REGISTRY_ENV);
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:9/");
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_transient() {
        // Port 9 (discard) is closed on loopback in practice
        let client = RegistryClient::with_timeout("http://127.0.0.1:9/", Duration::from_secs(2))
            .unwrap();
        let err = client.packument("left-pad").await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
