//! Closure expansion.
//!
//! The frontier is drained in batches of up to `width` items. Every item in a
//! batch runs concurrently: resolve, claim the identity in the shared
//! [`ClosureSet`], and (only for the claiming worker) fetch its runtime and
//! optional maps. Discovered ranges feed the next batch. Expansion ends when
//! the frontier is empty.

use super::budget::AdmissionBudget;
use super::depmap::DependencyMapFetcher;
use super::policy::{follow_edges, OptionalPolicy};
use super::resolver::VersionResolver;
use super::types::{DependencyEdge, DependencyKind, ResolvedIdentity, WorkItem};
use crate::error::Error;
use crate::pkg::spec::PackageSpec;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Every identity discovered so far, keyed by `name@version`.
///
/// Grows monotonically; nothing is ever removed.
#[derive(Debug, Default)]
pub struct ClosureSet {
    members: RwLock<BTreeMap<String, ResolvedIdentity>>,
}

impl ClosureSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the key is taken. Returns `true` for the first writer.
    pub async fn insert(&self, identity: ResolvedIdentity) -> bool {
        let mut members = self.members.write().await;
        let key = identity.key();
        if members.contains_key(&key) {
            return false;
        }
        members.insert(key, identity);
        true
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.members.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Members sorted by key.
    pub async fn snapshot(&self) -> Vec<ResolvedIdentity> {
        self.members.read().await.values().cloned().collect()
    }
}

/// What one call to [`ClosureExpander::expand`] added.
#[derive(Debug, Default)]
pub struct ExpansionPass {
    /// Identities this pass inserted, in discovery order.
    pub added: Vec<ResolvedIdentity>,
    pub edges: Vec<DependencyEdge>,
    pub batches: usize,
}

/// Result of processing one frontier item.
#[derive(Default)]
struct Processed {
    added: Option<ResolvedIdentity>,
    edges: Vec<DependencyEdge>,
}

pub struct ClosureExpander {
    resolver: Arc<VersionResolver>,
    depmap: Arc<DependencyMapFetcher>,
    closure: Arc<ClosureSet>,
    budget: Arc<AdmissionBudget>,
    policy: OptionalPolicy,
    width: usize,
    /// Specs ever enqueued during this run.
    queued: Mutex<HashSet<PackageSpec>>,
}

impl ClosureExpander {
    #[must_use]
    pub fn new(
        resolver: Arc<VersionResolver>,
        depmap: Arc<DependencyMapFetcher>,
        closure: Arc<ClosureSet>,
        budget: Arc<AdmissionBudget>,
        policy: OptionalPolicy,
    ) -> Self {
        let width = budget.limits().width;
        Self {
            resolver,
            depmap,
            closure,
            budget,
            policy,
            width,
            queued: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn closure(&self) -> &Arc<ClosureSet> {
        &self.closure
    }

    /// Expand from `seeds` until the frontier is empty.
    ///
    /// Specs already enqueued earlier in the run are dropped, so feeding the
    /// same ranges twice adds nothing.
    ///
    /// # Errors
    /// Returns [`Error::Backend`] when a run-aborting backend error occurred
    /// and [`Error::Cancelled`] when the run was cancelled externally.
    pub async fn expand(&self, seeds: Vec<WorkItem>) -> Result<ExpansionPass, Error> {
        let mut frontier: VecDeque<WorkItem> = VecDeque::new();
        for item in seeds {
            self.enqueue(&mut frontier, item);
        }

        let mut pass = ExpansionPass::default();

        while !frontier.is_empty() {
            let take = frontier.len().min(self.width);
            let batch: Vec<WorkItem> = frontier.drain(..take).collect();
            pass.batches += 1;
            debug!(batch = pass.batches, size = batch.len(), pending = frontier.len(), "expanding batch");

            let results: Vec<Processed> = stream::iter(batch)
                .map(|item| self.process(item))
                .buffer_unordered(self.width)
                .collect()
                .await;

            self.check_abort()?;

            for processed in results {
                if let Some(identity) = processed.added {
                    pass.added.push(identity);
                }
                for edge in processed.edges {
                    self.enqueue(&mut frontier, WorkItem::Spec(edge.to.clone()));
                    pass.edges.push(edge);
                }
            }
        }

        info!(
            added = pass.added.len(),
            closure = self.closure.len().await,
            batches = pass.batches,
            "expansion finished"
        );
        Ok(pass)
    }

    fn enqueue(&self, frontier: &mut VecDeque<WorkItem>, item: WorkItem) {
        if let WorkItem::Spec(spec) = &item {
            let mut queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
            if !queued.insert(spec.clone()) {
                return;
            }
        }
        frontier.push_back(item);
    }

    async fn process(&self, item: WorkItem) -> Processed {
        let identity = match item {
            WorkItem::Identity(identity) => {
                if self.resolver.admit(&identity).is_err() {
                    return Processed::default();
                }
                identity
            }
            WorkItem::Spec(spec) => match self.resolver.resolve(&spec).await {
                Ok(version) => ResolvedIdentity::new(spec.name, version),
                // Recorded by the resolver
                Err(_) => return Processed::default(),
            },
        };

        if !self.closure.insert(identity.clone()).await {
            return Processed::default();
        }

        let (runtime, optional) = tokio::join!(
            self.depmap.dependencies_of(&identity, DependencyKind::Runtime),
            self.depmap.dependencies_of(&identity, DependencyKind::Optional),
        );

        let edges = follow_edges(&identity, &runtime, &optional, &self.policy);
        debug!(identity = %identity, edges = edges.len(), "claimed");

        Processed {
            added: Some(identity),
            edges,
        }
    }

    fn check_abort(&self) -> Result<(), Error> {
        if let Some(fatal) = self.budget.fatal() {
            return Err(Error::Backend(fatal));
        }
        if self.budget.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
