use crate::mirror::budget::BudgetLimits;
use crate::mirror::policy::OptionalPolicy;
use crate::pkg::store::ArtifactLayout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the default concurrency width.
pub const CONCURRENCY_ENV: &str = "PKGMIRROR_CONCURRENCY";

/// Runtime configuration for the pkgmirror CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Tuning for one mirror run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Directory the artifacts land in.
    pub out_dir: PathBuf,
    pub layout: ArtifactLayout,
    /// Width of the admission budget.
    pub concurrency: usize,
    /// Retries for transient failures.
    pub retries: u32,
    /// Per-operation timeout.
    pub timeout: Duration,
    /// First retry delay; doubles per retry.
    pub backoff: Duration,
    /// Expansion rounds driven by archive introspection.
    pub max_rounds: u32,
    pub optional: OptionalPolicy,
    /// Follow development-only seeds (manifest devDependencies, lockfile dev entries).
    pub include_dev: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("mirror"),
            layout: ArtifactLayout::Npm,
            concurrency: 64,
            retries: 3,
            timeout: Duration::from_secs(60),
            backoff: Duration::from_millis(250),
            max_rounds: 2,
            optional: OptionalPolicy::default(),
            include_dev: false,
        }
    }
}

impl MirrorConfig {
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            ..Default::default()
        }
    }

    /// Apply `PKGMIRROR_CONCURRENCY` when set to a positive integer.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = std::env::var(CONCURRENCY_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            self.concurrency = n;
        }
        self
    }

    #[must_use]
    pub fn with_layout(mut self, layout: ArtifactLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    #[must_use]
    pub fn with_optional(mut self, optional: OptionalPolicy) -> Self {
        self.optional = optional;
        self
    }

    #[must_use]
    pub fn with_include_dev(mut self, include_dev: bool) -> Self {
        self.include_dev = include_dev;
        self
    }

    #[must_use]
    pub fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits {
            width: self.concurrency.max(1),
            retries: self.retries,
            timeout: self.timeout,
            backoff: self.backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = MirrorConfig::default();
        assert_eq!(config.concurrency, 64);
        assert_eq!(config.retries, 3);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_rounds, 2);
        assert_eq!(config.optional, OptionalPolicy::Include);
        assert!(!config.include_dev);
        assert_eq!(config.layout, ArtifactLayout::Npm);
    }

    #[test]
    fn test_builders() {
        let config = MirrorConfig::new("/tmp/out")
            .with_concurrency(0)
            .with_retries(1)
            .with_max_rounds(0)
            .with_optional(OptionalPolicy::Exclude)
            .with_layout(ArtifactLayout::Pypi);
        assert_eq!(config.out_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.layout, ArtifactLayout::Pypi);
        assert_eq!(config.budget_limits().width, 1);
        assert_eq!(config.budget_limits().retries, 1);
        assert_eq!(config.max_rounds, 0);
    }

    #[test]
    #[serial]
    fn test_concurrency_env() {
        std::env::set_var(CONCURRENCY_ENV, "8");
        assert_eq!(MirrorConfig::default().with_env_overrides().concurrency, 8);

        std::env::set_var(CONCURRENCY_ENV, "zero");
        assert_eq!(MirrorConfig::default().with_env_overrides().concurrency, 64);

        std::env::remove_var(CONCURRENCY_ENV);
    }

    #[test]
    fn test_cli_config_builders() {
        let config = Config::new(PathBuf::from("/work"))
            .with_verbosity(2)
            .with_json_logs(true);
        assert_eq!(config.cwd, PathBuf::from("/work"));
        assert_eq!(config.verbosity, 2);
        assert!(config.json_logs);
    }
}
