//! In-memory collaborators for engine tests.

use super::source::{ArtifactFetcher, ManifestExtractor, RegistrySource};
use super::types::ResolvedIdentity;
use crate::pkg::error::PkgError;
use crate::pkg::manifest::PackageManifest;
use crate::pkg::tarball::{read_embedded_manifest, tests::build_tgz};
use crate::pkg::version::resolve_version;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Registry backed by packuments held in memory.
#[derive(Debug, Default)]
pub struct StubRegistry {
    packuments: BTreeMap<String, Value>,
    broken_manifests: HashSet<String>,
    config_error: bool,
    delay: Option<Duration>,
    pub resolve_calls: Mutex<Vec<(String, String)>>,
    pub manifest_calls: Mutex<Vec<String>>,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `name@version`; `extra` is merged into its manifest.
    pub fn publish(mut self, name: &str, version: &str, extra: Value) -> Self {
        let mut manifest = Map::new();
        manifest.insert("name".into(), json!(name));
        manifest.insert("version".into(), json!(version));
        if let Value::Object(extra) = extra {
            manifest.extend(extra);
        }

        let packument = self
            .packuments
            .entry(name.to_string())
            .or_insert_with(|| json!({ "name": name, "dist-tags": {}, "versions": {} }));
        packument["versions"][version] = Value::Object(manifest);

        let latest = packument["versions"]
            .as_object()
            .into_iter()
            .flat_map(|v| v.keys())
            .filter_map(|v| semver::Version::parse(v).ok())
            .max();
        if let Some(latest) = latest {
            packument["dist-tags"]["latest"] = json!(latest.to_string());
        }
        self
    }

    /// Point dist-tag `tag` of `name` at `version`.
    pub fn tag(mut self, name: &str, tag: &str, version: &str) -> Self {
        if let Some(packument) = self.packuments.get_mut(name) {
            packument["dist-tags"][tag] = json!(version);
        }
        self
    }

    /// Manifest queries for `key` (`name@version`) fail.
    pub fn break_manifest(mut self, key: &str) -> Self {
        self.broken_manifests.insert(key.to_string());
        self
    }

    /// Every call fails with a configuration error.
    pub fn misconfigured(mut self) -> Self {
        self.config_error = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn resolve_count(&self) -> usize {
        self.resolve_calls.lock().unwrap().len()
    }

    pub fn manifest_count(&self) -> usize {
        self.manifest_calls.lock().unwrap().len()
    }

    fn packument(&self, name: &str) -> Result<&Value, PkgError> {
        if self.config_error {
            return Err(PkgError::registry_config("stub registry misconfigured"));
        }
        self.packuments
            .get(name)
            .ok_or_else(|| PkgError::not_found(name))
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RegistrySource for StubRegistry {
    async fn resolve_version(&self, name: &str, range: &str) -> Result<String, PkgError> {
        self.resolve_calls
            .lock()
            .unwrap()
            .push((name.to_string(), range.to_string()));
        self.pause().await;
        resolve_version(self.packument(name)?, range)
    }

    async fn fetch_manifest(&self, name: &str, version: &str) -> Result<PackageManifest, PkgError> {
        let key = format!("{name}@{version}");
        self.manifest_calls.lock().unwrap().push(key.clone());
        self.pause().await;

        if self.broken_manifests.contains(&key) {
            return Err(PkgError::registry(format!("corrupt metadata for {key}")));
        }
        let entry = self
            .packument(name)?
            .get("versions")
            .and_then(|v| v.get(version))
            .ok_or_else(|| PkgError::version_not_found(name, version))?;
        PackageManifest::from_value(entry)
    }
}

/// Fetcher that writes small tarballs carrying a chosen `package.json`.
#[derive(Debug, Default)]
pub struct StubFetcher {
    embedded: BTreeMap<String, Value>,
    failing: HashSet<String>,
    transient_failures: Mutex<BTreeMap<String, u32>>,
    pub fetches: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tarball of `key` embeds `manifest` instead of a bare name/version.
    pub fn embed(mut self, key: &str, manifest: Value) -> Self {
        self.embedded.insert(key.to_string(), manifest);
        self
    }

    /// Fetching `key` always fails.
    pub fn fail(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }

    /// Fetching `key` fails transiently `times` times, then succeeds.
    pub fn flaky(self, key: &str, times: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), times);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl ArtifactFetcher for StubFetcher {
    async fn fetch(&self, identity: &ResolvedIdentity, dest: &Path) -> Result<(), PkgError> {
        let key = identity.key();
        self.fetches.lock().unwrap().push(key.clone());

        if self.failing.contains(&key) {
            return Err(PkgError::download_failed(format!("stub refused {key}")));
        }
        {
            let mut flaky = self.transient_failures.lock().unwrap();
            if let Some(left) = flaky.get_mut(&key) {
                if *left > 0 {
                    *left -= 1;
                    return Err(
                        PkgError::download_failed(format!("stub reset {key}")).with_transient(true)
                    );
                }
            }
        }

        let manifest = self.embedded.get(&key).cloned().unwrap_or_else(|| {
            json!({ "name": identity.name, "version": identity.version })
        });
        let body = serde_json::to_vec(&manifest).unwrap();
        let tgz = build_tgz(&[("package/package.json", &body)]);
        pkgmirror_util::fs::atomic_write(dest, &tgz)?;
        Ok(())
    }
}

/// Extractor that reads the real tarballs written by [`StubFetcher`] and
/// counts scans.
#[derive(Debug, Default)]
pub struct CountingExtractor {
    pub scans: Mutex<Vec<String>>,
}

impl ManifestExtractor for CountingExtractor {
    fn read_embedded_manifest(&self, archive: &Path) -> Result<Option<PackageManifest>, PkgError> {
        self.scans
            .lock()
            .unwrap()
            .push(archive.display().to_string());
        read_embedded_manifest(archive)
    }
}
