//! Tarball download and embedded-manifest extraction.

use super::error::PkgError;
use super::manifest::PackageManifest;
use super::registry::{get_tarball_url, RegistryClient};
use crate::mirror::source::{ArtifactFetcher, ManifestExtractor};
use crate::mirror::types::ResolvedIdentity;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use reqwest::Client;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path};
use tar::Archive;
use tracing::debug;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Largest `package.json` read out of an archive (4 MB).
const MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

/// Download a tarball from a URL.
///
/// # Errors
/// Returns an error if the download fails or exceeds the size limit.
pub async fn download_tarball(
    client: &Client,
    url: &str,
    max_bytes: u64,
) -> Result<Bytes, PkgError> {
    let response = client.get(url).send().await.map_err(|e| {
        let err = PkgError::from(e);
        PkgError::download_failed(format!("Failed to download '{url}': {}", err.message()))
            .with_transient(err.is_transient())
    })?;

    let status = response.status();
    if !status.is_success() {
        let transient = status.is_server_error() || status.as_u16() == 429;
        return Err(PkgError::download_failed(format!(
            "Download failed with status {status} for '{url}'"
        ))
        .with_transient(transient));
    }

    // Check content length if available
    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(PkgError::download_failed(format!(
                "Tarball too large: {len} bytes (max: {max_bytes})"
            )));
        }
    }

    let bytes = response.bytes().await.map_err(|e| {
        PkgError::download_failed(format!("Failed to read response body: {e}")).with_transient(true)
    })?;

    if bytes.len() as u64 > max_bytes {
        return Err(PkgError::download_failed(format!(
            "Tarball too large: {} bytes (max: {max_bytes})",
            bytes.len()
        )));
    }

    Ok(bytes)
}

/// Fetches `.tgz` artifacts using the `dist.tarball` URL from the packument.
#[derive(Debug, Clone)]
pub struct TarballFetcher {
    registry: RegistryClient,
    max_bytes: u64,
}

impl TarballFetcher {
    #[must_use]
    pub fn new(registry: RegistryClient) -> Self {
        Self {
            registry,
            max_bytes: MAX_TARBALL_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl ArtifactFetcher for TarballFetcher {
    async fn fetch(&self, identity: &ResolvedIdentity, dest: &Path) -> Result<(), PkgError> {
        let packument = self.registry.packument(&identity.name).await?;
        let url = get_tarball_url(&packument, &identity.version).ok_or_else(|| {
            PkgError::download_failed(format!("No tarball URL for {}", identity.key()))
        })?;

        debug!(name = %identity.name, version = %identity.version, url, "downloading tarball");
        let bytes = download_tarball(self.registry.http(), url, self.max_bytes).await?;

        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || pkgmirror_util::fs::atomic_write(&dest, &bytes))
            .await
            .map_err(|e| PkgError::store(format!("Write task failed: {e}")))?
            .map_err(|e| PkgError::store(format!("Failed to write artifact: {e}")))
    }
}

/// Reads the `package.json` embedded in an npm tarball.
///
/// npm packs everything under a single top-level directory, usually
/// `package/`; some publishers (e.g. `@types/*`) use the bare package name.
///
/// Returns `Ok(None)` when the archive is readable but carries no manifest.
///
/// # Errors
/// Returns `PKG_EXTRACT_FAILED` if the file is not a gzip'd tar or the
/// manifest is not a JSON object.
pub fn read_embedded_manifest(archive_path: &Path) -> Result<Option<PackageManifest>, PkgError> {
    let file = File::open(archive_path).map_err(|e| {
        PkgError::extract_failed(format!("Failed to open {}: {e}", archive_path.display()))
    })?;

    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entries: {e}")))?;

    // top-level dir -> package.json text
    let mut candidates: BTreeMap<String, String> = BTreeMap::new();

    for entry in entries {
        let entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entry: {e}")))?;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?
            .into_owned();

        let Some(root) = manifest_root(&path) else {
            continue;
        };

        let mut content = String::new();
        entry
            .take(MAX_MANIFEST_SIZE)
            .read_to_string(&mut content)
            .map_err(|e| PkgError::extract_failed(format!("Failed to read package.json: {e}")))?;

        if root == "package" {
            return parse_embedded(&content).map(Some);
        }
        candidates.insert(root, content);
    }

    match candidates.len() {
        0 => Ok(None),
        1 => {
            let content = candidates.into_values().next().unwrap_or_default();
            parse_embedded(&content).map(Some)
        }
        n => Err(PkgError::extract_failed(format!(
            "Tarball contains {n} top-level package.json files, expected 1"
        ))),
    }
}

/// `<root>/package.json` -> `<root>`, rejecting anything deeper or unsafe.
fn manifest_root(path: &Path) -> Option<String> {
    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    let root = match components.next()? {
        Component::Normal(root) => root.to_str()?.to_string(),
        _ => return None,
    };
    match (components.next(), components.next()) {
        (Some(Component::Normal(file)), None) if file == "package.json" => Some(root),
        _ => None,
    }
}

fn parse_embedded(content: &str) -> Result<PackageManifest, PkgError> {
    PackageManifest::from_json_str(content)
        .map_err(|e| PkgError::extract_failed(format!("Embedded manifest: {}", e.message())))
}

/// [`ManifestExtractor`] over npm tarballs on local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarballManifestReader;

impl ManifestExtractor for TarballManifestReader {
    fn read_embedded_manifest(&self, archive: &Path) -> Result<Option<PackageManifest>, PkgError> {
        read_embedded_manifest(archive)
    }
}
