//! Collaborator ports.
//!
//! The engine never talks to the network or parses archives itself; it goes
//! through these traits so it can be driven by the npm implementations in
//! [`crate::pkg`] or by in-memory stubs.

use super::types::ResolvedIdentity;
use crate::pkg::error::PkgError;
use crate::pkg::manifest::PackageManifest;
use async_trait::async_trait;
use std::path::Path;

/// Registry queries.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Pick the version `range` selects for `name`.
    async fn resolve_version(&self, name: &str, range: &str) -> Result<String, PkgError>;

    /// Dependency sections of one published version.
    async fn fetch_manifest(&self, name: &str, version: &str) -> Result<PackageManifest, PkgError>;
}

/// Artifact transfer.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Write the artifact for `identity` to `dest`.
    ///
    /// Implementations must never leave a partial file at `dest`.
    async fn fetch(&self, identity: &ResolvedIdentity, dest: &Path) -> Result<(), PkgError>;
}

/// Reads the manifest packed inside a local artifact.
pub trait ManifestExtractor: Send + Sync {
    fn read_embedded_manifest(&self, archive: &Path) -> Result<Option<PackageManifest>, PkgError>;
}
