//! Closure resolution and artifact acquisition.
//!
//! - [`resolver`]: `(name, range) -> version`, memoized
//! - [`depmap`]: `(name, version) -> dependency sections`, memoized
//! - [`closure`]: frontier expansion into the shared closure set
//! - [`dispatch`]: bounded-concurrency downloads
//! - [`introspect`]: embedded-manifest discovery feeding extra rounds
//! - [`report`]: failure log and the run report
//!
//! Every network operation passes through one [`budget::AdmissionBudget`].

pub mod budget;
pub mod closure;
pub mod depmap;
pub mod dispatch;
pub mod introspect;
pub mod policy;
pub mod report;
pub mod resolver;
pub mod run;
pub mod source;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use budget::{AdmissionBudget, BudgetLimits};
pub use closure::{ClosureExpander, ClosureSet, ExpansionPass};
pub use depmap::DependencyMapFetcher;
pub use dispatch::{DownloadDispatcher, DownloadOutcome};
pub use introspect::{ArchiveIntrospector, IntrospectionPass};
pub use policy::{OptionalPolicy, PlatformTarget};
pub use report::{
    FailureLog, MirrorReport, MirrorSummary, Outcome, MIRROR_REPORT_FILE,
    MIRROR_REPORT_SCHEMA_VERSION,
};
pub use resolver::VersionResolver;
pub use run::{Mirror, SeedSet};
pub use source::{ArtifactFetcher, ManifestExtractor, RegistrySource};
pub use types::{
    ArtifactOrigin, ArtifactRecord, DependencyEdge, DependencyKind, FailureRecord, FailureStage,
    ResolvedIdentity, WorkItem,
};
