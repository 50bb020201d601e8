//! Distribution downloads and sdist metadata.

use super::registry::PypiClient;
use super::requirements::manifest_from_requires_dist;
use super::wheel::WheelTarget;
use crate::mirror::source::{ArtifactFetcher, ManifestExtractor};
use crate::mirror::types::ResolvedIdentity;
use crate::pkg::error::PkgError;
use crate::pkg::manifest::PackageManifest;
use crate::pkg::tarball::{download_tarball, MAX_TARBALL_SIZE};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path};
use tar::Archive;
use tracing::debug;

/// Largest `PKG-INFO` read out of an sdist (1 MB).
const MAX_PKG_INFO_SIZE: u64 = 1024 * 1024;

/// Downloads the distribution files [`WheelTarget`] selects into one
/// directory per release.
#[derive(Debug, Clone)]
pub struct PypiFetcher {
    client: PypiClient,
    target: WheelTarget,
    max_bytes: u64,
}

impl PypiFetcher {
    #[must_use]
    pub fn new(client: PypiClient, target: WheelTarget) -> Self {
        Self {
            client,
            target,
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
impl ArtifactFetcher for PypiFetcher {
    async fn fetch(&self, identity: &ResolvedIdentity, dest: &Path) -> Result<(), PkgError> {
        let files = self
            .client
            .release_files(&identity.name, &identity.version)
            .await?;
        let selected = self.target.select(&files);
        if selected.is_empty() {
            return Err(PkgError::download_failed(format!(
                "No distribution of {} matches the wheel target",
                identity.key()
            )));
        }

        let mut downloaded: Vec<(String, Bytes)> = Vec::with_capacity(selected.len());
        for file in selected {
            debug!(identity = %identity, file = %file.filename, "downloading distribution");
            let bytes = download_tarball(self.client.http(), &file.url, self.max_bytes).await?;
            downloaded.push((file.filename.clone(), bytes));
        }

        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let files: Vec<(&str, &[u8])> = downloaded
                .iter()
                .map(|(name, bytes)| (name.as_str(), bytes.as_ref()))
                .collect();
            pkgmirror_util::fs::atomic_write_dir(&dest, &files)
        })
        .await
        .map_err(|e| PkgError::store(format!("Write task failed: {e}")))?
        .map_err(|e| PkgError::store(format!("Failed to write distribution files: {e}")))
    }
}

/// Reads `Requires-Dist` from the `PKG-INFO` of an sdist inside a release
/// directory.
///
/// Returns `Ok(None)` when the release holds no sdist (wheel-only mirrors);
/// the registry metadata stands alone then.
///
/// # Errors
/// `PKG_EXTRACT_FAILED` if an sdist is not a readable gzip'd tar.
pub fn read_sdist_metadata(release_dir: &Path) -> Result<Option<PackageManifest>, PkgError> {
    if !release_dir.is_dir() {
        return Ok(None);
    }

    let mut sdists: Vec<_> = std::fs::read_dir(release_dir)
        .map_err(|e| {
            PkgError::extract_failed(format!("Failed to list {}: {e}", release_dir.display()))
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".tar.gz"))
        })
        .collect();
    sdists.sort();

    for sdist in sdists {
        if let Some(manifest) = read_pkg_info(&sdist)? {
            return Ok(Some(manifest));
        }
    }
    Ok(None)
}

fn read_pkg_info(sdist: &Path) -> Result<Option<PackageManifest>, PkgError> {
    let file = File::open(sdist)
        .map_err(|e| PkgError::extract_failed(format!("Failed to open {}: {e}", sdist.display())))?;

    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read sdist entries: {e}")))?;

    for entry in entries {
        let entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read sdist entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?
            .into_owned();
        if !is_top_level_pkg_info(&path) {
            continue;
        }

        let mut headers = String::new();
        let mut reader = BufReader::new(entry.take(MAX_PKG_INFO_SIZE));
        loop {
            let mut line = String::new();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| PkgError::extract_failed(format!("Failed to read PKG-INFO: {e}")))?;
            // Headers end at the first blank line; the description follows
            if read == 0 || line.trim().is_empty() {
                break;
            }
            headers.push_str(&line);
        }
        return Ok(Some(parse_pkg_info(&headers)));
    }
    Ok(None)
}

/// `<top>/PKG-INFO`
fn is_top_level_pkg_info(path: &Path) -> bool {
    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    matches!(
        (components.next(), components.next(), components.next()),
        (Some(Component::Normal(_)), Some(Component::Normal(file)), None) if file == "PKG-INFO"
    )
}

fn parse_pkg_info(headers: &str) -> PackageManifest {
    let mut name = None;
    let mut version = None;
    let mut requires = Vec::new();
    for line in headers.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(value),
            "version" => version = Some(value),
            "requires-dist" => requires.push(value),
            _ => {}
        }
    }
    manifest_from_requires_dist(name, version, requires)
}

/// [`ManifestExtractor`] over mirrored PyPI release directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct SdistMetadataReader;

impl ManifestExtractor for SdistMetadataReader {
    fn read_embedded_manifest(&self, archive: &Path) -> Result<Option<PackageManifest>, PkgError> {
        read_sdist_metadata(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::codes;
    use crate::pkg::tarball::tests::build_tgz;
    use tempfile::tempdir;

    const PKG_INFO: &[u8] = b"Metadata-Version: 2.1\n\
Name: Requests\n\
Version: 2.31.0\n\
Requires-Dist: charset-normalizer<4,>=2\n\
Requires-Dist: idna<4,>=2.5\n\
Requires-Dist: PySocks!=1.5.7,>=1.5.6; extra == \"socks\"\n\
\n\
Requires-Dist: not-a-header\n";

    #[test]
    fn test_reads_sdist_requires_dist() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("requests-2.31.0.tar.gz"),
            build_tgz(&[
                ("requests-2.31.0/setup.py", b""),
                ("requests-2.31.0/PKG-INFO", PKG_INFO),
                ("requests-2.31.0/src/requests.egg-info/PKG-INFO", b"Name: nested\n"),
            ]),
        )
        .unwrap();
        std::fs::write(dir.path().join("requests-2.31.0-py3-none-any.whl"), b"zip").unwrap();

        let manifest = SdistMetadataReader
            .read_embedded_manifest(dir.path())
            .unwrap()
            .unwrap();
        assert_eq!(manifest.name.as_deref(), Some("requests"));
        assert_eq!(manifest.version.as_deref(), Some("2.31.0"));
        assert_eq!(
            manifest.dependencies.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["charset-normalizer", "idna"]
        );
        assert!(!manifest.dependencies.contains_key("not-a-header"));
    }

    #[test]
    fn test_wheel_only_release_has_no_manifest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("six-1.16.0-py2.py3-none-any.whl"), b"zip").unwrap();
        assert!(read_sdist_metadata(dir.path()).unwrap().is_none());
        assert!(read_sdist_metadata(&dir.path().join("missing")).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_sdist_is_extract_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad-1.0.tar.gz"), b"not gzip").unwrap();
        let err = read_sdist_metadata(dir.path()).unwrap_err();
        assert_eq!(err.code(), codes::PKG_EXTRACT_FAILED);
    }

    #[test]
    fn test_pkg_info_location() {
        assert!(is_top_level_pkg_info(Path::new("a-1.0/PKG-INFO")));
        assert!(is_top_level_pkg_info(Path::new("./a-1.0/PKG-INFO")));
        assert!(!is_top_level_pkg_info(Path::new("PKG-INFO")));
        assert!(!is_top_level_pkg_info(Path::new("a-1.0/src/a.egg-info/PKG-INFO")));
        assert!(!is_top_level_pkg_info(Path::new("../PKG-INFO")));
    }
}
