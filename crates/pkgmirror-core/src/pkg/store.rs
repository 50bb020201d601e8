//! On-disk artifact layout.
//!
//! npm artifacts use the file names `npm pack` produces. A PyPI release may
//! consist of several distribution files, so each gets its own directory:
//!
//! ```text
//! <root>/lodash-4.17.21.tgz
//! <root>/@babel/core-7.23.0.tgz
//! <root>/requests/2.31.0/requests-2.31.0-py3-none-any.whl
//! ```

use super::error::PkgError;
use super::spec::split_scope;
use crate::mirror::types::ResolvedIdentity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// How artifacts are laid out under the store root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactLayout {
    /// One `.tgz` file per identity.
    #[default]
    Npm,
    /// One directory of distribution files per identity.
    Pypi,
}

/// Directory holding mirrored artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    layout: ArtifactLayout,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            layout: ArtifactLayout::Npm,
        }
    }

    #[must_use]
    pub fn with_layout(mut self, layout: ArtifactLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn layout(&self) -> ArtifactLayout {
        self.layout
    }

    /// Deterministic artifact path for an identity.
    ///
    /// # Errors
    /// Returns `PKG_SPEC_INVALID` when the identity would not map to a path
    /// strictly inside the root.
    pub fn artifact_path(&self, identity: &ResolvedIdentity) -> Result<PathBuf, PkgError> {
        identity.validate()?;

        let relative = match (self.layout, split_scope(&identity.name)) {
            (ArtifactLayout::Pypi, _) => {
                PathBuf::from(&identity.name).join(&identity.version)
            }
            (ArtifactLayout::Npm, (Some(scope), bare)) => PathBuf::from(format!("@{scope}"))
                .join(format!("{bare}-{}.tgz", identity.version)),
            (ArtifactLayout::Npm, (None, name)) => {
                PathBuf::from(format!("{name}-{}.tgz", identity.version))
            }
        };

        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(PkgError::spec_invalid(format!(
                "Artifact path for {identity} escapes the output directory"
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Whether `path` holds a complete artifact for this layout.
    ///
    /// Downloads are renamed into place only once written, so existence
    /// implies completeness.
    #[must_use]
    pub fn exists_at(&self, path: &Path) -> bool {
        match self.layout {
            ArtifactLayout::Npm => path.is_file(),
            ArtifactLayout::Pypi => path.is_dir(),
        }
    }

    /// Create the store root.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn ensure_root(&self) -> Result<(), PkgError> {
        fs::create_dir_all(&self.root).map_err(|e| {
            PkgError::store(format!(
                "Failed to create output directory {}: {e}",
                self.root.display()
            ))
        })
    }

    /// Every artifact currently in the store, relative to the root, sorted.
    ///
    /// In-progress temp files and directories are hidden and never listed.
    #[must_use]
    pub fn list_present(&self) -> Vec<PathBuf> {
        let layout = self.layout;
        let mut found: Vec<PathBuf> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(2)
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(Result::ok)
            .filter(|e| match layout {
                ArtifactLayout::Npm => {
                    e.file_type().is_file() && e.file_name().to_string_lossy().ends_with(".tgz")
                }
                ArtifactLayout::Pypi => e.depth() == 2 && e.file_type().is_dir(),
            })
            .filter_map(|e| e.path().strip_prefix(&self.root).ok().map(Path::to_path_buf))
            .collect();
        found.sort();
        found
    }
}
