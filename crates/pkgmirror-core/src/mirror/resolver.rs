//! Version resolution, memoized per exact `(name, range)`.

use super::budget::AdmissionBudget;
use super::report::FailureLog;
use super::source::RegistrySource;
use super::types::{FailureStage, ResolvedIdentity};
use crate::pkg::error::PkgError;
use crate::pkg::spec::PackageSpec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

type Slot = Arc<OnceCell<Result<String, PkgError>>>;

/// Resolves ranges through the registry, at most once per distinct pair.
///
/// Concurrent callers asking for the same pair wait on the first caller's
/// query. Failures are cached as well, and recorded once.
pub struct VersionResolver {
    registry: Arc<dyn RegistrySource>,
    budget: Arc<AdmissionBudget>,
    failures: FailureLog,
    cache: Mutex<HashMap<PackageSpec, Slot>>,
    queries: AtomicU64,
}

impl VersionResolver {
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
            queries: AtomicU64::new(0),
        }
    }

    /// Resolve `spec` to a concrete version.
    ///
    /// # Errors
    /// Returns the (cached) resolution error for this pair.
    pub async fn resolve(&self, spec: &PackageSpec) -> Result<String, PkgError> {
        let slot = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(spec.clone())
            .or_default()
            .clone();

        slot.get_or_init(|| self.query(spec)).await.clone()
    }

    /// Check an identity that bypassed resolution (a lockfile pin).
    ///
    /// # Errors
    /// Returns `PKG_SPEC_INVALID`, recorded as a resolution failure, when
    /// the name or version is not acceptable.
    pub fn admit(&self, identity: &ResolvedIdentity) -> Result<(), PkgError> {
        identity.validate().inspect_err(|err| {
            self.failures.record(identity.key(), FailureStage::Resolve, err);
        })
    }

    async fn query(&self, spec: &PackageSpec) -> Result<String, PkgError> {
        if let Err(err) = PackageSpec::check_name(&spec.name) {
            self.failures.record(spec.to_string(), FailureStage::Resolve, &err);
            return Err(err);
        }

        self.queries.fetch_add(1, Ordering::Relaxed);
        let what = format!("resolve {spec}");
        let result = self
            .budget
            .run(&what, || self.registry.resolve_version(&spec.name, &spec.range))
            .await
            .and_then(|version| {
                ResolvedIdentity::new(spec.name.clone(), version.clone())
                    .validate()
                    .map(|()| version)
            });

        match &result {
            Ok(version) => debug!(name = %spec.name, range = %spec.range, version = %version, "resolved"),
            Err(err) if err.is_cancelled() => {}
            Err(err) => self.failures.record(spec.to_string(), FailureStage::Resolve, err),
        }
        result
    }

    /// Distinct pairs sent to the registry so far.
    #[must_use]
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}
