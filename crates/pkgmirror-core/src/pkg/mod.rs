//! npm collaborators.
//!
//! Provides utilities for:
//! - Parsing package specifications (name@range)
//! - Reading dependency sections from package.json
//! - Reading prior `package-lock.json` snapshots
//! - Fetching package metadata from the npm registry
//! - Resolving version ranges using semver
//! - Downloading tarballs and reading their embedded manifests
//! - Laying out mirrored artifacts on disk

pub mod error;
pub mod lockfile;
pub mod manifest;
pub mod registry;
pub mod spec;
pub mod store;
pub mod tarball;
pub mod version;

pub use error::{codes as pkg_codes, PkgError};
pub use lockfile::{
    codes as lockfile_codes, LockSnapshot, LockedPackage, LockfileError, NPM_LOCKFILE_NAME,
};
pub use manifest::{PackageManifest, PkgDepError};
pub use registry::{get_tarball_url, RegistryClient, DEFAULT_REGISTRY, REGISTRY_ENV};
pub use spec::PackageSpec;
pub use store::{ArtifactLayout, ArtifactStore};
pub use tarball::{
    download_tarball, read_embedded_manifest, TarballFetcher, TarballManifestReader,
    MAX_TARBALL_SIZE,
};
pub use version::resolve_version;
