use crate::pkg::error::PkgError;
use crate::pkg::lockfile::LockfileError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a mirror run.
///
/// Per-package problems never show up here; they are collected as
/// failure records in the report.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry is misconfigured or was never reachable.
    #[error("Backend failure: {0}")]
    Backend(PkgError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Failed to read manifest at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: PkgError,
    },

    #[error("Failed to read lockfile at {path}: {source}")]
    Lockfile {
        path: PathBuf,
        #[source]
        source: LockfileError,
    },

    #[error("Artifact store unusable: {0}")]
    Store(PkgError),

    #[error("Failed to write report to {path}: {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Stable code for JSON output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Backend(e) | Self::Store(e) => e.code(),
            Self::Manifest { source, .. } => source.code(),
            Self::Lockfile { source, .. } => source.code(),
            Self::Cancelled => crate::pkg::error::codes::PKG_CANCELLED,
            Self::Io(_) | Self::ReportWrite { .. } => "MIRROR_IO_ERROR",
            Self::Other(_) => "MIRROR_ERROR",
        }
    }
}
