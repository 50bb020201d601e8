//! Second-pass discovery from downloaded artifacts.
//!
//! Registry metadata can lag behind what a tarball actually declares. Each
//! present artifact is opened once and the dependencies its embedded
//! `package.json` lists are turned into edges for the next expansion round.

use super::policy::{follow_edges, OptionalPolicy};
use super::source::ManifestExtractor;
use super::types::{ArtifactRecord, DependencyEdge};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Result of one introspection round.
#[derive(Debug, Default)]
pub struct IntrospectionPass {
    pub edges: Vec<DependencyEdge>,
    /// Artifacts opened this round.
    pub scanned: usize,
    /// Artifacts that could not be parsed.
    pub unreadable: usize,
}

pub struct ArchiveIntrospector {
    extractor: Arc<dyn ManifestExtractor>,
    policy: OptionalPolicy,
    width: usize,
    scanned: Mutex<HashSet<String>>,
}

impl ArchiveIntrospector {
    #[must_use]
    pub fn new(extractor: Arc<dyn ManifestExtractor>, policy: OptionalPolicy, width: usize) -> Self {
        Self {
            extractor,
            policy,
            width: width.max(1),
            scanned: Mutex::new(HashSet::new()),
        }
    }

    /// Scan every present record not scanned before.
    pub async fn scan(&self, records: &[ArtifactRecord]) -> IntrospectionPass {
        let fresh: Vec<ArtifactRecord> = {
            let mut scanned = self.scanned.lock().unwrap_or_else(PoisonError::into_inner);
            records
                .iter()
                .filter(|r| r.present && scanned.insert(r.identity.key()))
                .cloned()
                .collect()
        };

        let results: Vec<Option<Vec<DependencyEdge>>> = stream::iter(fresh)
            .map(|record| self.scan_one(record))
            .buffer_unordered(self.width)
            .collect()
            .await;

        let mut pass = IntrospectionPass {
            scanned: results.len(),
            ..IntrospectionPass::default()
        };
        for result in results {
            match result {
                Some(edges) => pass.edges.extend(edges),
                None => pass.unreadable += 1,
            }
        }
        pass.edges.sort();

        debug!(
            scanned = pass.scanned,
            unreadable = pass.unreadable,
            edges = pass.edges.len(),
            "introspection round finished"
        );
        pass
    }

    async fn scan_one(&self, record: ArtifactRecord) -> Option<Vec<DependencyEdge>> {
        let extractor = Arc::clone(&self.extractor);
        let path = record.local_path.clone();
        let result = tokio::task::spawn_blocking(move || extractor.read_embedded_manifest(&path)).await;

        match result {
            Ok(Ok(Some(manifest))) => Some(follow_edges(
                &record.identity,
                &manifest.dependencies,
                &manifest.optional_dependencies,
                &self.policy,
            )),
            Ok(Ok(None)) => {
                debug!(identity = %record.identity, "no embedded manifest");
                Some(Vec::new())
            }
            Ok(Err(e)) => {
                warn!(identity = %record.identity, code = e.code(), error = %e, "skipping unreadable artifact");
                None
            }
            Err(e) => {
                warn!(identity = %record.identity, error = %e, "introspection task failed");
                None
            }
        }
    }
}
