//! Distribution file selection.
//!
//! For each requested platform the mirror keeps one wheel built for it. When
//! none exists it falls back to a pure-Python wheel, then to the sdist.
//! Without platforms only the portable files are kept.

use super::registry::ReleaseFile;
use crate::pkg::error::PkgError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compatibility tags parsed from a wheel file name
/// (`{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelTags {
    pub python: Vec<String>,
    pub abi: Vec<String>,
    pub platform: Vec<String>,
}

impl WheelTags {
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        let stem = filename.strip_suffix(".whl")?;
        let parts: Vec<&str> = stem.split('-').collect();
        if !(5..=6).contains(&parts.len()) {
            return None;
        }
        let tags = &parts[parts.len() - 3..];
        let split = |s: &str| s.split('.').map(str::to_ascii_lowercase).collect();
        Some(Self {
            python: split(tags[0]),
            abi: split(tags[1]),
            platform: split(tags[2]),
        })
    }

    #[must_use]
    pub fn is_pure(&self) -> bool {
        self.platform.iter().all(|p| p == "any")
    }

    fn supports_python(&self, target: Option<PythonVersion>) -> bool {
        let Some(PythonVersion { major, minor }) = target else {
            return true;
        };
        let abi3 = self.abi.iter().any(|a| a == "abi3");
        self.python.iter().any(|tag| {
            if tag == &format!("py{major}") || tag == &format!("py{major}{minor}") {
                return true;
            }
            let Some(cp) = tag.strip_prefix(&format!("cp{major}")) else {
                return false;
            };
            match cp.parse::<u32>() {
                Ok(built_for) if built_for == minor => true,
                // Stable-ABI wheels run on every later minor release
                Ok(built_for) => abi3 && built_for < minor,
                Err(_) => false,
            }
        })
    }

    fn supports_platform(&self, platform: &str) -> bool {
        self.platform.iter().any(|p| p == platform)
    }
}

/// `3.11`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonVersion {
    pub major: u32,
    pub minor: u32,
}

impl FromStr for PythonVersion {
    type Err = PkgError;

    fn from_str(s: &str) -> Result<Self, PkgError> {
        let invalid = || PkgError::spec_invalid(format!("Invalid Python version '{s}'"));
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Interpreter and platforms the mirrored wheels must serve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelTarget {
    pub python: Option<PythonVersion>,
    /// Wheel platform tags such as `manylinux2014_x86_64` or `win_amd64`.
    pub platforms: Vec<String>,
}

impl WheelTarget {
    /// Files to mirror for one release, in file-list order, deduplicated.
    #[must_use]
    pub fn select<'a>(&self, files: &'a [ReleaseFile]) -> Vec<&'a ReleaseFile> {
        let live: Vec<(&ReleaseFile, Option<WheelTags>)> = files
            .iter()
            .filter(|f| !f.yanked)
            .map(|f| (f, WheelTags::from_filename(&f.filename)))
            .collect();

        let usable = |tags: &WheelTags| tags.supports_python(self.python);
        let pure = live
            .iter()
            .find(|(_, tags)| tags.as_ref().is_some_and(|t| t.is_pure() && usable(t)))
            .map(|(f, _)| *f);
        let sdist = live
            .iter()
            .find(|(f, tags)| tags.is_none() && f.is_sdist())
            .map(|(f, _)| *f);
        let portable = pure.or(sdist);

        let mut chosen: Vec<&ReleaseFile> = Vec::new();
        if self.platforms.is_empty() {
            chosen.extend(portable);
        }
        for platform in &self.platforms {
            let built = live
                .iter()
                .find(|(_, tags)| {
                    tags.as_ref()
                        .is_some_and(|t| t.supports_platform(platform) && usable(t))
                })
                .map(|(f, _)| *f);
            if let Some(file) = built.or(portable) {
                if !chosen.iter().any(|c| c.filename == file.filename) {
                    chosen.push(file);
                }
            }
        }
        chosen
    }
}
