//! Dependency maps of resolved identities.

use super::budget::AdmissionBudget;
use super::report::FailureLog;
use super::source::RegistrySource;
use super::types::{DependencyKind, FailureStage, ResolvedIdentity};
use crate::pkg::manifest::PackageManifest;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

type Slot = Arc<OnceCell<Arc<PackageManifest>>>;

/// Fetches published manifests, one query per `(name, version)`.
///
/// A failed query degrades the package to a leaf: every section reads as
/// empty and the failure is recorded once.
pub struct DependencyMapFetcher {
    registry: Arc<dyn RegistrySource>,
    budget: Arc<AdmissionBudget>,
    failures: FailureLog,
    cache: Mutex<HashMap<ResolvedIdentity, Slot>>,
}

impl DependencyMapFetcher {
    #[must_use]
    pub fn new(
        registry: Arc<dyn RegistrySource>,
        budget: Arc<AdmissionBudget>,
        failures: FailureLog,
    ) -> Self {
        Self {
            registry,
            budget,
            failures,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// `{name -> range}` for one section of `identity`'s manifest.
    pub async fn dependencies_of(
        &self,
        identity: &ResolvedIdentity,
        kind: DependencyKind,
    ) -> BTreeMap<String, String> {
        let manifest = self.manifest(identity).await;
        match kind {
            DependencyKind::Runtime => manifest.dependencies.clone(),
            DependencyKind::Optional => manifest.optional_dependencies.clone(),
            DependencyKind::Peer => manifest.peer_dependencies.clone(),
        }
    }

    async fn manifest(&self, identity: &ResolvedIdentity) -> Arc<PackageManifest> {
        let slot = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(identity.clone())
            .or_default()
            .clone();

        slot.get_or_init(|| self.query(identity)).await.clone()
    }

    async fn query(&self, identity: &ResolvedIdentity) -> Arc<PackageManifest> {
        let what = format!("manifest {identity}");
        let result = self
            .budget
            .run(&what, || {
                self.registry
                    .fetch_manifest(&identity.name, &identity.version)
            })
            .await;

        match result {
            Ok(manifest) => {
                debug!(
                    name = %identity.name,
                    version = %identity.version,
                    dependencies = manifest.dependencies.len(),
                    optional = manifest.optional_dependencies.len(),
                    "fetched dependency map"
                );
                Arc::new(manifest)
            }
            Err(err) => {
                if !err.is_cancelled() {
                    self.failures
                        .record(identity.key(), FailureStage::FetchDeps, &err);
                }
                Arc::new(PackageManifest::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::budget::BudgetLimits;
    use crate::mirror::testing::StubRegistry;
    use serde_json::json;
    use std::time::Duration;

    fn fetcher(stub: &Arc<StubRegistry>) -> (DependencyMapFetcher, FailureLog) {
        let budget = Arc::new(AdmissionBudget::new(BudgetLimits {
            width: 8,
            retries: 0,
            timeout: Duration::from_secs(5),
            backoff: Duration::from_millis(1),
        }));
        let failures = FailureLog::new();
        let registry: Arc<dyn RegistrySource> = Arc::clone(stub) as Arc<dyn RegistrySource>;
        (
            DependencyMapFetcher::new(registry, budget, failures.clone()),
            failures,
        )
    }

    #[tokio::test]
    async fn test_sections_share_one_query() {
        let stub = Arc::new(StubRegistry::new().publish(
            "a",
            "1.0.0",
            json!({
                "dependencies": { "b": "^2.0.0" },
                "optionalDependencies": { "fsevents": "^2.3.0" }
            }),
        ));
        let (fetcher, failures) = fetcher(&stub);
        let a = ResolvedIdentity::new("a", "1.0.0");

        let (runtime, optional) = tokio::join!(
            fetcher.dependencies_of(&a, DependencyKind::Runtime),
            fetcher.dependencies_of(&a, DependencyKind::Optional)
        );

        assert_eq!(runtime.get("b").map(String::as_str), Some("^2.0.0"));
        assert_eq!(optional.get("fsevents").map(String::as_str), Some("^2.3.0"));
        assert_eq!(stub.manifest_count(), 1);
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn test_failure_degrades_to_leaf() {
        let stub = Arc::new(
            StubRegistry::new()
                .publish("a", "1.0.0", json!({ "dependencies": { "b": "1" } }))
                .break_manifest("a@1.0.0"),
        );
        let (fetcher, failures) = fetcher(&stub);
        let a = ResolvedIdentity::new("a", "1.0.0");

        assert!(fetcher.dependencies_of(&a, DependencyKind::Runtime).await.is_empty());
        assert!(fetcher.dependencies_of(&a, DependencyKind::Optional).await.is_empty());

        let records = failures.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stage, FailureStage::FetchDeps);
        assert_eq!(records[0].subject, "a@1.0.0");
        assert_eq!(stub.manifest_count(), 1);
    }
}
