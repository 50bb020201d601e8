use miette::{IntoDiagnostic, Result};
use pkgmirror_core::mirror::{
    DependencyKind, FailureStage, Mirror, MirrorReport, OptionalPolicy, Outcome, PlatformTarget,
    SeedSet, MIRROR_REPORT_FILE,
};
use pkgmirror_core::paths::{default_manifest_path, sibling_lockfile};
use pkgmirror_core::pkg::{
    ArtifactLayout, LockSnapshot, PackageManifest, PackageSpec, RegistryClient, TarballFetcher,
    TarballManifestReader, DEFAULT_REGISTRY, REGISTRY_ENV,
};
use pkgmirror_core::pypi::{
    find_requirements_files, PypiClient, PypiFetcher, PythonVersion, Requirement,
    RequirementsFile, SdistMetadataReader, WheelTarget, DEFAULT_INDEX, INDEX_ENV,
};
use pkgmirror_core::{Config, Error, MirrorConfig};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// `--optional` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OptionalMode {
    Include,
    Exclude,
    Platforms,
}

/// `--ecosystem` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Ecosystem {
    /// npm when a package.json is around, PyPI when only requirements files are
    Auto,
    Npm,
    Pypi,
}

impl Ecosystem {
    fn detect(self, config: &Config, options: &MirrorOptions) -> Self {
        if self != Self::Auto {
            return self;
        }
        if options.manifest.is_some() || options.lockfile.is_some() {
            return Self::Npm;
        }
        if !options.requirements.is_empty() {
            return Self::Pypi;
        }
        if !default_manifest_path(&config.cwd).is_file()
            && !find_requirements_files(&config.cwd).is_empty()
        {
            return Self::Pypi;
        }
        Self::Npm
    }
}

/// Parsed `pkgmirror mirror` flags.
#[derive(Debug)]
pub struct MirrorOptions {
    pub ecosystem: Ecosystem,
    pub manifest: Option<PathBuf>,
    pub lockfile: Option<PathBuf>,
    pub requirements: Vec<PathBuf>,
    pub add: Vec<String>,
    pub out: PathBuf,
    pub concurrency: Option<usize>,
    pub retries: Option<u32>,
    pub timeout: Option<u64>,
    pub max_rounds: Option<u32>,
    pub optional: OptionalMode,
    pub platforms: Vec<PlatformTarget>,
    pub include_dev: bool,
    pub python: Option<PythonVersion>,
    pub wheel_platforms: Vec<String>,
    pub registry: Option<String>,
    pub dry_run: bool,
}

/// JSON result for `pkgmirror --json mirror`.
#[derive(Serialize)]
struct MirrorJsonResult<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a MirrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorInfo>,
}

#[derive(Serialize)]
struct ErrorInfo {
    code: String,
    message: String,
}

pub fn run(config: &Config, options: MirrorOptions) -> Result<()> {
    let json = config.json_logs;

    match execute(config, &options) {
        Ok(report) => {
            let ok = report.outcome().is_success();
            if json {
                print_json(&MirrorJsonResult {
                    ok,
                    report: Some(&report),
                    error: None,
                })?;
            } else {
                print_human(&report, options.dry_run)?;
            }
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(err) => {
            if json {
                print_json(&MirrorJsonResult {
                    ok: false,
                    report: None,
                    error: Some(ErrorInfo {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    }),
                })?;
            } else {
                eprintln!("error: {}: {err}", err.code());
            }
            std::process::exit(1);
        }
    }
}

fn execute(config: &Config, options: &MirrorOptions) -> Result<MirrorReport, Error> {
    let ecosystem = options.ecosystem.detect(config, options);
    let seeds = match ecosystem {
        Ecosystem::Pypi => build_requirement_seeds(config, options)?,
        Ecosystem::Npm | Ecosystem::Auto => build_seeds(config, options)?,
    };
    let mirror_config = build_config(config, options, ecosystem)?;
    let (registry_url, mirror) = build_mirror(options, ecosystem, mirror_config.clone())?;

    info!(
        ecosystem = ?ecosystem,
        registry = %registry_url,
        out = %mirror_config.out_dir.display(),
        concurrency = mirror_config.concurrency,
        seeds = seeds.specs.len() + seeds.dev.len() + seeds.locked.len(),
        "starting mirror"
    );

    let cancel = CancellationToken::new();
    let mirror = mirror.with_cancel_token(cancel.clone());

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling in-flight work");
                cancel.cancel();
            }
        });

        if options.dry_run {
            mirror.resolve_only(&seeds).await
        } else {
            mirror.run(&seeds).await
        }
    })?;

    if !options.dry_run {
        write_report(&mirror_config.out_dir, &report)?;
    }
    Ok(report)
}

/// The engine wired to npm or PyPI collaborators, plus the registry URL used.
fn build_mirror(
    options: &MirrorOptions,
    ecosystem: Ecosystem,
    mirror_config: MirrorConfig,
) -> Result<(String, Mirror), Error> {
    let timeout = mirror_config.timeout;
    let (url, mirror) = match ecosystem {
        Ecosystem::Pypi => {
            let index_url = options
                .registry
                .clone()
                .or_else(|| std::env::var(INDEX_ENV).ok())
                .unwrap_or_else(|| DEFAULT_INDEX.to_string());
            let client = PypiClient::with_timeout(&index_url, timeout).map_err(Error::Backend)?;
            let target = WheelTarget {
                python: options.python,
                platforms: options.wheel_platforms.clone(),
            };
            let url = client.base_url().to_string();
            let mirror = Mirror::new(
                mirror_config,
                Arc::new(client.clone()),
                Arc::new(PypiFetcher::new(client, target)),
                Arc::new(SdistMetadataReader),
            );
            (url, mirror)
        }
        Ecosystem::Npm | Ecosystem::Auto => {
            let registry_url = options
                .registry
                .clone()
                .or_else(|| std::env::var(REGISTRY_ENV).ok())
                .unwrap_or_else(|| DEFAULT_REGISTRY.to_string());
            let registry =
                RegistryClient::with_timeout(&registry_url, timeout).map_err(Error::Backend)?;
            let url = registry.base_url().to_string();
            let mirror = Mirror::new(
                mirror_config,
                Arc::new(registry.clone()),
                Arc::new(TarballFetcher::new(registry)),
                Arc::new(TarballManifestReader),
            );
            (url, mirror)
        }
    };
    Ok((url.clone(), mirror.with_registry_url(url)))
}

fn build_seeds(config: &Config, options: &MirrorOptions) -> Result<SeedSet, Error> {
    let manifest_path = match &options.manifest {
        Some(path) => absolutize(&config.cwd, path),
        None => default_manifest_path(&config.cwd),
    };

    // Explicit --add specs make the manifest optional
    let manifest_optional = options.manifest.is_none() && !options.add.is_empty();
    let mut seeds = if manifest_optional && !manifest_path.is_file() {
        SeedSet::new()
    } else {
        let manifest =
            PackageManifest::read_from(&manifest_path).map_err(|source| Error::Manifest {
                path: manifest_path.clone(),
                source,
            })?;
        for problem in &manifest.errors {
            warn!(entry = %problem.name, code = problem.code, "{}", problem.message);
        }
        SeedSet::from_manifest(&manifest)
    };

    let lockfile = match &options.lockfile {
        Some(path) => Some(absolutize(&config.cwd, path)),
        None => sibling_lockfile(&manifest_path),
    };
    if let Some(path) = lockfile {
        let snapshot = LockSnapshot::read_from(&path).map_err(|source| Error::Lockfile {
            path: path.clone(),
            source,
        })?;
        info!(
            lockfile = %path.display(),
            packages = snapshot.packages.len(),
            peers = snapshot.peers.len(),
            "seeding from lockfile"
        );
        seeds = seeds.with_lockfile(&snapshot);
    }

    for spec in &options.add {
        let spec = PackageSpec::parse(spec).map_err(|source| Error::Manifest {
            path: PathBuf::from("--add"),
            source,
        })?;
        seeds.add(spec, DependencyKind::Runtime);
    }

    if seeds.is_empty() {
        warn!("nothing to mirror: no dependencies, lockfile entries or --add specs");
    }
    Ok(seeds)
}

fn build_requirement_seeds(config: &Config, options: &MirrorOptions) -> Result<SeedSet, Error> {
    let paths: Vec<PathBuf> = if options.requirements.is_empty() {
        find_requirements_files(&config.cwd)
    } else {
        options
            .requirements
            .iter()
            .map(|path| absolutize(&config.cwd, path))
            .collect()
    };

    let mut requirements = RequirementsFile::default();
    for path in &paths {
        let file = RequirementsFile::read_from(path).map_err(|source| Error::Manifest {
            path: path.clone(),
            source,
        })?;
        info!(
            requirements = %path.display(),
            entries = file.requirements.len(),
            "seeding from requirements file"
        );
        requirements.merge(file);
    }
    for problem in &requirements.errors {
        warn!(entry = %problem.name, code = problem.code, "{}", problem.message);
    }

    let mut seeds = SeedSet::from_requirements(&requirements);
    for line in &options.add {
        let requirement = Requirement::parse(line).map_err(|source| Error::Manifest {
            path: PathBuf::from("--add"),
            source,
        })?;
        seeds.add(requirement.to_spec(), DependencyKind::Runtime);
    }

    if seeds.is_empty() {
        warn!("nothing to mirror: no requirements files or --add requirements");
    }
    Ok(seeds)
}

fn build_config(
    config: &Config,
    options: &MirrorOptions,
    ecosystem: Ecosystem,
) -> Result<MirrorConfig, Error> {
    let optional = match options.optional {
        OptionalMode::Include => OptionalPolicy::Include,
        OptionalMode::Exclude => OptionalPolicy::Exclude,
        OptionalMode::Platforms if !options.platforms.is_empty() => {
            OptionalPolicy::Platforms(options.platforms.clone())
        }
        OptionalMode::Platforms => {
            let host = PlatformTarget::host().ok_or_else(|| {
                Error::other("--optional platforms needs --platform on this host")
            })?;
            OptionalPolicy::Platforms(vec![host])
        }
    };
    let layout = match ecosystem {
        Ecosystem::Pypi => ArtifactLayout::Pypi,
        Ecosystem::Npm | Ecosystem::Auto => ArtifactLayout::Npm,
    };

    let mut mirror_config = MirrorConfig::new(absolutize(&config.cwd, &options.out))
        .with_env_overrides()
        .with_layout(layout)
        .with_optional(optional)
        .with_include_dev(options.include_dev);

    if let Some(n) = options.concurrency {
        mirror_config = mirror_config.with_concurrency(n);
    }
    if let Some(n) = options.retries {
        mirror_config = mirror_config.with_retries(n);
    }
    if let Some(secs) = options.timeout {
        mirror_config = mirror_config.with_timeout(Duration::from_secs(secs.max(1)));
    }
    if let Some(n) = options.max_rounds {
        mirror_config = mirror_config.with_max_rounds(n);
    }
    Ok(mirror_config)
}

fn write_report(out_dir: &Path, report: &MirrorReport) -> Result<(), Error> {
    let path = out_dir.join(MIRROR_REPORT_FILE);
    let body = report
        .to_json_pretty()
        .map_err(|e| Error::other(format!("Failed to serialize report: {e}")))?;
    pkgmirror_util::fs::atomic_write(&path, body.as_bytes())
        .map_err(|source| Error::ReportWrite { path, source })
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn print_json(result: &MirrorJsonResult<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(result).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

fn print_human(report: &MirrorReport, dry_run: bool) -> Result<()> {
    let mut out = io::stdout().lock();
    let summary = &report.summary;

    w(&mut out, "\x1b[1m## Closure\x1b[0m\n")?;
    w(&mut out, &format!("  Packages:       {}\n", summary.closure_size))?;
    w(&mut out, &format!("  Edges:          {}\n", report.edges.len()))?;
    if !dry_run {
        w(&mut out, &format!("  Extra rounds:   {}\n", summary.extra_rounds))?;
        w(&mut out, "\n")?;

        w(&mut out, "\x1b[1m## Artifacts\x1b[0m\n")?;
        w(&mut out, &format!("  Downloaded:     {}\n", summary.downloaded))?;
        w(&mut out, &format!("  Skipped:        {}\n", summary.skipped))?;
        w(&mut out, &format!("  Failed:         {}\n", summary.failed))?;
    } else {
        for identity in &report.closure {
            w(&mut out, &format!("  {identity}\n"))?;
        }
    }
    w(&mut out, "\n")?;

    if !report.failures.is_empty() {
        w(&mut out, "\x1b[1m## Failures\x1b[0m\n")?;
        for stage in [FailureStage::Resolve, FailureStage::FetchDeps, FailureStage::Download] {
            for failure in report.failures_in(stage) {
                w(
                    &mut out,
                    &format!(
                        "  [{}] {} {}: {}\n",
                        stage_label(stage),
                        failure.subject,
                        failure.code,
                        failure.reason
                    ),
                )?;
            }
        }
        w(&mut out, "\n")?;
    }

    let verdict = match report.outcome() {
        Outcome::Ok => "\x1b[32mok\x1b[0m",
        Outcome::Partial => "\x1b[33mpartial\x1b[0m",
        Outcome::Failed => "\x1b[31mfailed\x1b[0m",
    };
    w(&mut out, &format!("Result: {verdict}\n"))?;
    Ok(())
}

fn stage_label(stage: FailureStage) -> &'static str {
    match stage {
        FailureStage::Resolve => "resolve",
        FailureStage::FetchDeps => "deps",
        FailureStage::Download => "download",
    }
}

fn w(out: &mut impl Write, s: &str) -> Result<()> {
    out.write_all(s.as_bytes()).into_diagnostic()
}
