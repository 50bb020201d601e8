//! Artifact downloads.

use super::budget::AdmissionBudget;
use super::report::FailureLog;
use super::source::ArtifactFetcher;
use super::types::{ArtifactOrigin, ArtifactRecord, FailureStage, ResolvedIdentity};
use crate::error::Error;
use crate::pkg::error::PkgError;
use crate::pkg::store::ArtifactStore;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Log a progress line every this many finished artifacts.
const PROGRESS_EVERY: usize = 100;

/// Per-pass result, each list sorted by identity.
#[derive(Debug, Default)]
pub struct DownloadOutcome {
    pub succeeded: Vec<ArtifactRecord>,
    /// Already on disk; fetched nothing.
    pub skipped: Vec<ArtifactRecord>,
    pub failed: Vec<ArtifactRecord>,
}

impl DownloadOutcome {
    /// Every record of the pass.
    pub fn records(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.succeeded
            .iter()
            .chain(&self.skipped)
            .chain(&self.failed)
    }
}

/// Downloads one artifact per identity through the admission budget.
pub struct DownloadDispatcher {
    fetcher: Arc<dyn ArtifactFetcher>,
    store: ArtifactStore,
    budget: Arc<AdmissionBudget>,
    failures: FailureLog,
}

impl DownloadDispatcher {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ArtifactFetcher>,
        store: ArtifactStore,
        budget: Arc<AdmissionBudget>,
        failures: FailureLog,
    ) -> Self {
        Self {
            fetcher,
            store,
            budget,
            failures,
        }
    }

    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Make sure every identity has an artifact on disk.
    ///
    /// A failed download is recorded and never cancels its siblings.
    ///
    /// # Errors
    /// Returns [`Error::Backend`] or [`Error::Cancelled`] when the run was
    /// aborted while downloading.
    pub async fn download_all(
        &self,
        identities: &[ResolvedIdentity],
    ) -> Result<DownloadOutcome, Error> {
        let width = self.budget.limits().width;
        let total = identities.len();
        let done = &AtomicUsize::new(0);

        let records: Vec<ArtifactRecord> = stream::iter(identities)
            .map(|identity| async move {
                let record = self.download_one(identity).await;
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % PROGRESS_EVERY == 0 {
                    info!(finished, total, "download progress");
                }
                record
            })
            .buffer_unordered(width)
            .collect()
            .await;

        if let Some(fatal) = self.budget.fatal() {
            return Err(Error::Backend(fatal));
        }
        if self.budget.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut outcome = DownloadOutcome::default();
        for record in records {
            match (record.present, record.origin) {
                (true, Some(ArtifactOrigin::Existing)) => outcome.skipped.push(record),
                (true, _) => outcome.succeeded.push(record),
                (false, _) => outcome.failed.push(record),
            }
        }
        for list in [&mut outcome.succeeded, &mut outcome.skipped, &mut outcome.failed] {
            list.sort_by(|a, b| a.identity.cmp(&b.identity));
        }

        info!(
            downloaded = outcome.succeeded.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "download pass finished"
        );
        Ok(outcome)
    }

    async fn download_one(&self, identity: &ResolvedIdentity) -> ArtifactRecord {
        let path = match self.store.artifact_path(identity) {
            Ok(path) => path,
            Err(err) => {
                self.failures.record(identity.key(), FailureStage::Download, &err);
                return missing(identity, PathBuf::new());
            }
        };

        if self.store.exists_at(&path) {
            debug!(identity = %identity, "artifact present, skipping");
            return ArtifactRecord {
                identity: identity.clone(),
                digest: digest_of(&path).await,
                local_path: path,
                present: true,
                origin: Some(ArtifactOrigin::Existing),
            };
        }

        let what = format!("download {identity}");
        let result = self
            .budget
            .run(&what, || self.fetcher.fetch(identity, &path))
            .await;

        match result {
            Ok(()) if self.store.exists_at(&path) => ArtifactRecord {
                identity: identity.clone(),
                digest: digest_of(&path).await,
                local_path: path,
                present: true,
                origin: Some(ArtifactOrigin::Downloaded),
            },
            Ok(()) => {
                let err = PkgError::store(format!(
                    "Fetcher reported success but {} is missing",
                    path.display()
                ));
                self.failures.record(identity.key(), FailureStage::Download, &err);
                missing(identity, path)
            }
            Err(err) => {
                if !err.is_cancelled() {
                    self.failures.record(identity.key(), FailureStage::Download, &err);
                }
                missing(identity, path)
            }
        }
    }
}

fn missing(identity: &ResolvedIdentity, path: PathBuf) -> ArtifactRecord {
    ArtifactRecord {
        identity: identity.clone(),
        local_path: path,
        present: false,
        digest: None,
        origin: None,
    }
}

/// File digest for a `.tgz`, directory digest for a PyPI release.
async fn digest_of(path: &Path) -> Option<String> {
    let owned = path.to_path_buf();
    let task = tokio::task::spawn_blocking(move || {
        if owned.is_dir() {
            pkgmirror_util::hash::blake3_dir(&owned)
        } else {
            pkgmirror_util::hash::blake3_file(&owned)
        }
    });
    match task.await {
        Ok(Ok(digest)) => Some(digest),
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "failed to hash artifact");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "hash task failed");
            None
        }
    }
}
