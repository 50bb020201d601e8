//! Optional-dependency policy.
//!
//! npm marks platform-specific binaries (`@esbuild/linux-x64`,
//! `@next/swc-darwin-arm64`, ...) as optional dependencies. A mirror for a
//! known set of deployment targets can skip the ones no target will install.

use super::types::{DependencyEdge, DependencyKind, ResolvedIdentity};
use crate::pkg::spec::{split_scope, PackageSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which optional dependencies join the closure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "targets")]
pub enum OptionalPolicy {
    /// Mirror every optional dependency.
    #[default]
    Include,
    /// Mirror none.
    Exclude,
    /// Mirror those whose platform keywords match one of the targets.
    Platforms(Vec<PlatformTarget>),
}

impl OptionalPolicy {
    /// Whether an optional dependency named `name` is followed.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::Include => true,
            Self::Exclude => false,
            Self::Platforms(targets) => {
                let keywords = PlatformKeywords::of(name);
                keywords.is_empty() || targets.iter().any(|t| keywords.covered_by(t))
            }
        }
    }
}

/// An `os-cpu` pair using Node's names (`linux-x64`, `darwin-arm64`, `win32-x64`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformTarget {
    pub os: String,
    pub cpu: String,
}

impl PlatformTarget {
    #[must_use]
    pub fn new(os: impl Into<String>, cpu: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            cpu: cpu.into(),
        }
    }

    /// The platform this process runs on, if Node has a name for it.
    #[must_use]
    pub fn host() -> Option<Self> {
        let os = normalize_os(std::env::consts::OS)?;
        let cpu = normalize_cpu(std::env::consts::ARCH)?;
        Some(Self::new(os, cpu))
    }
}

impl FromStr for PlatformTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (os, cpu) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("expected <os>-<cpu> (e.g. linux-x64), got '{s}'"))?;
        let os = normalize_os(os).ok_or_else(|| format!("unknown os '{os}' in '{s}'"))?;
        let cpu = normalize_cpu(cpu).ok_or_else(|| format!("unknown cpu '{cpu}' in '{s}'"))?;
        Ok(Self::new(os, cpu))
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.cpu)
    }
}

fn normalize_os(token: &str) -> Option<&'static str> {
    Some(match token.to_ascii_lowercase().as_str() {
        "linux" => "linux",
        "darwin" | "macos" | "osx" | "mac" => "darwin",
        "win32" | "windows" | "win" => "win32",
        "freebsd" => "freebsd",
        "openbsd" => "openbsd",
        "netbsd" => "netbsd",
        "sunos" => "sunos",
        "aix" => "aix",
        "android" => "android",
        _ => return None,
    })
}

fn normalize_cpu(token: &str) -> Option<&'static str> {
    Some(match token.to_ascii_lowercase().as_str() {
        "x64" | "amd64" | "x86_64" => "x64",
        "arm64" | "aarch64" => "arm64",
        "ia32" | "x86" | "i386" | "i686" => "ia32",
        "arm" | "armv7" | "arm7" => "arm",
        "ppc64" | "ppc64le" | "powerpc64" => "ppc64",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        "loong64" | "loongarch64" => "loong64",
        "mips64el" => "mips64el",
        _ => return None,
    })
}

/// OS and CPU keywords found in a package name.
#[derive(Debug, Default)]
struct PlatformKeywords {
    os: Vec<&'static str>,
    cpu: Vec<&'static str>,
}

impl PlatformKeywords {
    fn of(name: &str) -> Self {
        let (_, bare) = split_scope(name);
        let mut keywords = Self::default();
        for token in bare.split(|c: char| c == '-' || c == '.') {
            if let Some(os) = normalize_os(token) {
                keywords.os.push(os);
            } else if let Some(cpu) = normalize_cpu(token) {
                keywords.cpu.push(cpu);
            }
        }
        keywords
    }

    fn is_empty(&self) -> bool {
        self.os.is_empty() && self.cpu.is_empty()
    }

    fn covered_by(&self, target: &PlatformTarget) -> bool {
        self.os.iter().all(|os| *os == target.os) && self.cpu.iter().all(|cpu| *cpu == target.cpu)
    }
}

/// Edges a manifest contributes under `policy`.
///
/// npm lists optional dependencies in `dependencies` too; the optional
/// section wins so a skipped platform binary is not pulled back in.
#[must_use]
pub fn follow_edges(
    from: &ResolvedIdentity,
    runtime: &BTreeMap<String, String>,
    optional: &BTreeMap<String, String>,
    policy: &OptionalPolicy,
) -> Vec<DependencyEdge> {
    let runtime_edges = runtime
        .iter()
        .filter(|(name, _)| !optional.contains_key(*name))
        .map(|(name, range)| (name, range, DependencyKind::Runtime));
    let optional_edges = optional
        .iter()
        .filter(|(name, _)| policy.allows(name))
        .map(|(name, range)| (name, range, DependencyKind::Optional));

    runtime_edges
        .chain(optional_edges)
        .map(|(name, range, kind)| DependencyEdge {
            from: from.clone(),
            to: PackageSpec::new(name.clone(), range.clone()),
            kind,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(list: &[&str]) -> OptionalPolicy {
        OptionalPolicy::Platforms(list.iter().map(|t| t.parse().unwrap()).collect())
    }

    #[test]
    fn test_parse_target() {
        let t: PlatformTarget = "macos-aarch64".parse().unwrap();
        assert_eq!(t, PlatformTarget::new("darwin", "arm64"));
        assert_eq!(t.to_string(), "darwin-arm64");

        assert!("linux".parse::<PlatformTarget>().is_err());
        assert!("plan9-x64".parse::<PlatformTarget>().is_err());
    }

    #[test]
    fn test_include_and_exclude() {
        assert!(OptionalPolicy::Include.allows("@esbuild/linux-x64"));
        assert!(!OptionalPolicy::Exclude.allows("fsevents"));
    }

    #[test]
    fn test_platform_heuristic() {
        let policy = targets(&["linux-x64", "darwin-arm64"]);

        assert!(policy.allows("@esbuild/linux-x64"));
        assert!(policy.allows("@next/swc-darwin-arm64"));
        assert!(policy.allows("@rollup/rollup-linux-x64-gnu"));
        assert!(!policy.allows("@esbuild/win32-x64"));
        assert!(!policy.allows("@esbuild/linux-arm64"));
        assert!(!policy.allows("@esbuild/darwin-x64"));
        // No keywords: nothing to judge by
        assert!(policy.allows("fsevents"));
        assert!(policy.allows("bufferutil"));
    }

    #[test]
    fn test_os_only_keyword() {
        let policy = targets(&["linux-arm64"]);
        assert!(policy.allows("@parcel/watcher-linux"));
        assert!(!policy.allows("@parcel/watcher-windows"));
    }

    #[test]
    fn test_follow_edges_prefers_optional_section() {
        let from = ResolvedIdentity::new("esbuild", "0.19.0");
        let runtime = BTreeMap::from([
            ("a".to_string(), "^1.0.0".to_string()),
            ("@esbuild/win32-x64".to_string(), "0.19.0".to_string()),
        ]);
        let optional = BTreeMap::from([
            ("@esbuild/linux-x64".to_string(), "0.19.0".to_string()),
            ("@esbuild/win32-x64".to_string(), "0.19.0".to_string()),
        ]);

        let edges = follow_edges(&from, &runtime, &optional, &targets(&["linux-x64"]));
        let summary: Vec<(&str, DependencyKind)> =
            edges.iter().map(|e| (e.to.name.as_str(), e.kind)).collect();

        assert_eq!(
            summary,
            vec![
                ("a", DependencyKind::Runtime),
                ("@esbuild/linux-x64", DependencyKind::Optional),
            ]
        );
    }
}
