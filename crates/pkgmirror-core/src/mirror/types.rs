//! Records flowing through the mirror engine.

use crate::pkg::error::PkgError;
use crate::pkg::spec::PackageSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A concrete `(name, version)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub name: String,
    pub version: String,
}

impl ResolvedIdentity {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// `name@version`, the closure key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Check that both parts are safe to use in a file name.
    ///
    /// # Errors
    /// Returns `PKG_SPEC_INVALID` for a bad name or a version containing a
    /// path separator, a leading dot, or control characters.
    pub fn validate(&self) -> Result<(), PkgError> {
        PackageSpec::check_name(&self.name)?;
        let version = self.version.as_str();
        if version.is_empty()
            || version.starts_with('.')
            || version.chars().any(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
        {
            return Err(PkgError::spec_invalid(format!(
                "Invalid version '{version}' for package '{}'",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ResolvedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Which manifest section a dependency came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Runtime,
    Optional,
    Peer,
}

impl DependencyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Optional => "optional",
            Self::Peer => "peer",
        }
    }
}

/// `from` requires `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: ResolvedIdentity,
    pub to: PackageSpec,
    pub kind: DependencyKind,
}

/// How an artifact came to be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactOrigin {
    /// Fetched during this run.
    Downloaded,
    /// Already on disk; no network call was made.
    Existing,
}

/// One closure member's artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub identity: ResolvedIdentity,
    pub local_path: PathBuf,
    pub present: bool,
    /// BLAKE3 hex digest of the file, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<ArtifactOrigin>,
}

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Resolve,
    FetchDeps,
    Download,
}

/// A non-fatal, per-package failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// `name@range` for resolution failures, `name@version` otherwise.
    pub subject: String,
    pub stage: FailureStage,
    pub code: String,
    pub reason: String,
}

/// A frontier entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkItem {
    /// A range that still needs resolving.
    Spec(PackageSpec),
    /// A version pinned by a lockfile.
    Identity(ResolvedIdentity),
}
