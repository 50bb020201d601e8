//! Run orchestration.
//!
//! ```text
//! seeds -> expand -> download -> introspect -+-> report
//!            ^                               |
//!            +---- new edges (<= max_rounds) -+
//! ```

use super::budget::AdmissionBudget;
use super::closure::{ClosureExpander, ClosureSet};
use super::depmap::DependencyMapFetcher;
use super::dispatch::DownloadDispatcher;
use super::introspect::ArchiveIntrospector;
use super::report::{FailureLog, MirrorReport, MirrorSummary, Outcome, MIRROR_REPORT_SCHEMA_VERSION};
use super::resolver::VersionResolver;
use super::source::{ArtifactFetcher, ManifestExtractor, RegistrySource};
use super::types::{ArtifactOrigin, ArtifactRecord, DependencyEdge, DependencyKind, ResolvedIdentity, WorkItem};
use crate::config::MirrorConfig;
use crate::error::Error;
use crate::pkg::lockfile::{LockSnapshot, LockedPackage};
use crate::pkg::manifest::PackageManifest;
use crate::pkg::spec::PackageSpec;
use crate::pkg::store::ArtifactStore;
use crate::pypi::requirements::RequirementsFile;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Top-level requirements of a run.
///
/// Development-only entries are kept apart; whether they are followed is
/// decided by [`MirrorConfig::include_dev`] when the run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSet {
    pub specs: Vec<(PackageSpec, DependencyKind)>,
    /// The top-level manifest's `devDependencies`.
    pub dev: Vec<PackageSpec>,
    pub locked: Vec<LockedPackage>,
}

impl SeedSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds from a project manifest.
    #[must_use]
    pub fn from_manifest(manifest: &PackageManifest) -> Self {
        let mut seeds = Self::new();
        let sections = [
            (&manifest.dependencies, DependencyKind::Runtime),
            (&manifest.optional_dependencies, DependencyKind::Optional),
            (&manifest.peer_dependencies, DependencyKind::Peer),
        ];
        for (section, kind) in sections {
            for (name, range) in section {
                seeds.add(PackageSpec::new(name.clone(), range.clone()), kind);
            }
        }
        seeds.dev.extend(
            manifest
                .dev_dependencies
                .iter()
                .map(|(name, range)| PackageSpec::new(name.clone(), range.clone())),
        );
        seeds
    }

    /// Add a lockfile's pinned identities and peer ranges.
    #[must_use]
    pub fn with_lockfile(mut self, snapshot: &LockSnapshot) -> Self {
        self.locked.extend(snapshot.packages.iter().cloned());
        for peer in &snapshot.peers {
            self.add(peer.clone(), DependencyKind::Peer);
        }
        self
    }

    /// Seeds from pip requirements. Requirements that only apply to an
    /// extra are skipped.
    #[must_use]
    pub fn from_requirements(requirements: &RequirementsFile) -> Self {
        let mut seeds = Self::new();
        for requirement in requirements.requirements.iter().filter(|r| !r.is_extra_only()) {
            seeds.add(requirement.to_spec(), DependencyKind::Runtime);
        }
        seeds
    }

    pub fn add(&mut self, spec: PackageSpec, kind: DependencyKind) {
        self.specs.push((spec, kind));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty() && self.dev.is_empty() && self.locked.is_empty()
    }

    /// Frontier seeds for a run under `config`.
    ///
    /// Optional entries go through the optional policy; development entries
    /// (manifest and lockfile) are dropped unless `include_dev` is set.
    #[must_use]
    pub fn work_items(&self, config: &MirrorConfig) -> Vec<WorkItem> {
        let policy = &config.optional;
        let specs = self
            .specs
            .iter()
            .filter(|(spec, kind)| *kind != DependencyKind::Optional || policy.allows(&spec.name))
            .map(|(spec, _)| spec);
        let dev = self.dev.iter().filter(|_| config.include_dev);
        let locked = self
            .locked
            .iter()
            .filter(|p| config.include_dev || !p.dev)
            .filter(|p| !p.optional || policy.allows(&p.name))
            .map(|p| WorkItem::Identity(ResolvedIdentity::new(p.name.clone(), p.version.clone())));
        specs
            .chain(dev)
            .map(|spec| WorkItem::Spec(spec.clone()))
            .chain(locked)
            .collect()
    }
}

/// The engine, wired to its collaborators.
pub struct Mirror {
    config: MirrorConfig,
    registry: Arc<dyn RegistrySource>,
    fetcher: Arc<dyn ArtifactFetcher>,
    extractor: Arc<dyn ManifestExtractor>,
    cancel: CancellationToken,
    registry_url: Option<String>,
}

/// Per-run state.
struct Session {
    budget: Arc<AdmissionBudget>,
    failures: FailureLog,
    expander: ClosureExpander,
}

impl Mirror {
    #[must_use]
    pub fn new(
        config: MirrorConfig,
        registry: Arc<dyn RegistrySource>,
        fetcher: Arc<dyn ArtifactFetcher>,
        extractor: Arc<dyn ManifestExtractor>,
    ) -> Self {
        Self {
            config,
            registry,
            fetcher,
            extractor,
            cancel: CancellationToken::new(),
            registry_url: None,
        }
    }

    /// Cancel runs through `token` (e.g. on Ctrl-C).
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Registry URL recorded in the report.
    #[must_use]
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    fn session(&self) -> Session {
        let budget = Arc::new(AdmissionBudget::with_token(
            self.config.budget_limits(),
            self.cancel.child_token(),
        ));
        let failures = FailureLog::new();
        let resolver = Arc::new(VersionResolver::new(
            Arc::clone(&self.registry),
            Arc::clone(&budget),
            failures.clone(),
        ));
        let depmap = Arc::new(DependencyMapFetcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&budget),
            failures.clone(),
        ));
        let expander = ClosureExpander::new(
            resolver,
            depmap,
            Arc::new(ClosureSet::new()),
            Arc::clone(&budget),
            self.config.optional.clone(),
        );
        Session {
            budget,
            failures,
            expander,
        }
    }

    /// Resolve the closure without downloading anything.
    ///
    /// # Errors
    /// Returns an error only for run-aborting conditions.
    pub async fn resolve_only(&self, seeds: &SeedSet) -> Result<MirrorReport, Error> {
        let session = self.session();
        let pass = session
            .expander
            .expand(seeds.work_items(&self.config))
            .await?;
        let edges: BTreeSet<DependencyEdge> = pass.edges.into_iter().collect();
        Ok(self.report(&session, edges, BTreeMap::new(), 0).await)
    }

    /// Resolve, download and introspect until no new identity appears.
    ///
    /// # Errors
    /// Returns an error only for run-aborting conditions; per-package
    /// failures are part of the report.
    pub async fn run(&self, seeds: &SeedSet) -> Result<MirrorReport, Error> {
        let store = ArtifactStore::new(&self.config.out_dir).with_layout(self.config.layout);
        store.ensure_root().map_err(Error::Store)?;

        let session = self.session();
        let dispatcher = DownloadDispatcher::new(
            Arc::clone(&self.fetcher),
            store,
            Arc::clone(&session.budget),
            session.failures.clone(),
        );
        let introspector = ArchiveIntrospector::new(
            Arc::clone(&self.extractor),
            self.config.optional.clone(),
            self.config.concurrency,
        );

        let mut edges: BTreeSet<DependencyEdge> = BTreeSet::new();
        let mut artifacts: BTreeMap<String, ArtifactRecord> = BTreeMap::new();

        let pass = session
            .expander
            .expand(seeds.work_items(&self.config))
            .await?;
        edges.extend(pass.edges);
        let outcome = dispatcher.download_all(&pass.added).await?;
        for record in outcome.records() {
            artifacts.insert(record.identity.key(), record.clone());
        }

        let mut extra_rounds = 0;
        while extra_rounds < self.config.max_rounds {
            let present: Vec<ArtifactRecord> = artifacts.values().cloned().collect();
            let scan = introspector.scan(&present).await;

            let work: Vec<WorkItem> = scan
                .edges
                .iter()
                .filter(|e| !edges.contains(*e))
                .map(|e| WorkItem::Spec(e.to.clone()))
                .collect();
            edges.extend(scan.edges);
            if work.is_empty() {
                break;
            }

            extra_rounds += 1;
            let pass = session.expander.expand(work).await?;
            edges.extend(pass.edges);
            info!(round = extra_rounds, added = pass.added.len(), "introspection round");
            if pass.added.is_empty() {
                break;
            }

            let outcome = dispatcher.download_all(&pass.added).await?;
            for record in outcome.records() {
                artifacts.insert(record.identity.key(), record.clone());
            }
        }

        let present = dispatcher.store().list_present().len();
        info!(present, out_dir = %self.config.out_dir.display(), "artifact store");

        Ok(self.report(&session, edges, artifacts, extra_rounds).await)
    }

    async fn report(
        &self,
        session: &Session,
        edges: BTreeSet<DependencyEdge>,
        artifacts: BTreeMap<String, ArtifactRecord>,
        extra_rounds: u32,
    ) -> MirrorReport {
        let closure = session.expander.closure().snapshot().await;
        let artifacts: Vec<ArtifactRecord> = artifacts.into_values().collect();
        let failures = session.failures.snapshot();

        let count = |origin: ArtifactOrigin| {
            artifacts
                .iter()
                .filter(|a| a.present && a.origin == Some(origin))
                .count()
        };
        let summary = MirrorSummary {
            closure_size: closure.len(),
            downloaded: count(ArtifactOrigin::Downloaded),
            skipped: count(ArtifactOrigin::Existing),
            failed: artifacts.iter().filter(|a| !a.present).count(),
            failures: failures.len(),
            extra_rounds,
            outcome: Outcome::classify(closure.len(), &artifacts, &failures),
        };

        info!(
            closure = summary.closure_size,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            failures = summary.failures,
            peak_in_flight = session.budget.peak_in_flight(),
            outcome = summary.outcome.as_str(),
            "mirror finished"
        );

        MirrorReport {
            schema_version: MIRROR_REPORT_SCHEMA_VERSION,
            generated_at: chrono::Utc::now().to_rfc3339(),
            registry: self.registry_url.clone(),
            closure,
            edges: edges.into_iter().collect(),
            artifacts,
            failures,
            summary,
        }
    }
}
