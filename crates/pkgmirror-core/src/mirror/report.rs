//! Progress and failure reporting.

use super::types::{ArtifactRecord, DependencyEdge, FailureRecord, FailureStage, ResolvedIdentity};
use crate::pkg::error::PkgError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Schema version of the JSON report.
pub const MIRROR_REPORT_SCHEMA_VERSION: u32 = 1;

/// File name the CLI writes next to the artifacts.
pub const MIRROR_REPORT_FILE: &str = "mirror-report.json";

/// Shared, append-only failure accumulator.
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    records: Arc<Mutex<Vec<FailureRecord>>>,
}

impl FailureLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a failure and log it.
    pub fn record(&self, subject: impl Into<String>, stage: FailureStage, err: &PkgError) {
        let record = FailureRecord {
            subject: subject.into(),
            stage,
            code: err.code().to_string(),
            reason: err.message().to_string(),
        };
        warn!(subject = %record.subject, stage = ?stage, code = err.code(), "{}", err.message());
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every record so far, in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FailureRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// No failures.
    Ok,
    /// Some failures; the bundle is usable but incomplete.
    Partial,
    /// Nothing usable was produced.
    Failed,
}

impl Outcome {
    /// Classify a finished run.
    ///
    /// A run fails outright when every closure member failed to download, or
    /// when the closure is empty because the top-level specs all failed.
    #[must_use]
    pub fn classify(
        closure_size: usize,
        artifacts: &[ArtifactRecord],
        failures: &[FailureRecord],
    ) -> Self {
        if failures.is_empty() {
            return Self::Ok;
        }
        if closure_size == 0 {
            return Self::Failed;
        }
        if !artifacts.is_empty() && artifacts.iter().all(|a| !a.present) {
            return Self::Failed;
        }
        Self::Partial
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Aggregate counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSummary {
    pub closure_size: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: usize,
    /// Introspection rounds that ran after the first download pass.
    pub extra_rounds: u32,
    pub outcome: Outcome,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorReport {
    pub schema_version: u32,
    pub generated_at: String,
    pub registry: Option<String>,
    /// Sorted by key.
    pub closure: Vec<ResolvedIdentity>,
    pub edges: Vec<DependencyEdge>,
    pub artifacts: Vec<ArtifactRecord>,
    pub failures: Vec<FailureRecord>,
    pub summary: MirrorSummary,
}

impl MirrorReport {
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.summary.outcome
    }

    /// Failures from one stage.
    pub fn failures_in(&self, stage: FailureStage) -> impl Iterator<Item = &FailureRecord> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn artifact(present: bool) -> ArtifactRecord {
        ArtifactRecord {
            identity: ResolvedIdentity::new("a", "1.0.0"),
            local_path: PathBuf::from("a-1.0.0.tgz"),
            present,
            digest: None,
            origin: None,
        }
    }

    fn failure(stage: FailureStage) -> FailureRecord {
        FailureRecord {
            subject: "x@1".to_string(),
            stage,
            code: "PKG_NOT_FOUND".to_string(),
            reason: "gone".to_string(),
        }
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(Outcome::classify(0, &[], &[]), Outcome::Ok);
        assert_eq!(Outcome::classify(2, &[artifact(true)], &[]), Outcome::Ok);
        assert_eq!(
            Outcome::classify(2, &[artifact(true), artifact(false)], &[failure(FailureStage::Download)]),
            Outcome::Partial
        );
        assert_eq!(
            Outcome::classify(1, &[artifact(false)], &[failure(FailureStage::Download)]),
            Outcome::Failed
        );
        assert_eq!(
            Outcome::classify(0, &[], &[failure(FailureStage::Resolve)]),
            Outcome::Failed
        );
        // Resolve-only runs carry no artifacts
        assert_eq!(
            Outcome::classify(3, &[], &[failure(FailureStage::FetchDeps)]),
            Outcome::Partial
        );
    }

    #[test]
    fn test_failure_log_is_shared() {
        let log = FailureLog::new();
        let other = log.clone();
        other.record("b@2.0.0", FailureStage::Download, &PkgError::download_failed("reset"));

        assert_eq!(log.len(), 1);
        let records = log.snapshot();
        assert_eq!(records[0].code, "PKG_DOWNLOAD_FAILED");
        assert_eq!(records[0].reason, "reset");
    }
}
