//! `requirements.txt` and `Requires-Dist` reading.
//!
//! Both use the PEP 508 requirement shape `name[extras] specifiers ; marker`.
//! Markers are not evaluated: a requirement guarded only by an environment
//! marker is kept, one guarded by an `extra` is dropped, so the mirror may
//! hold slightly more than one interpreter would install.

use super::normalize_name;
use super::version::SpecifierSet;
use crate::pkg::error::{codes, PkgError};
use crate::pkg::manifest::{PackageManifest, PkgDepError};
use crate::pkg::spec::PackageSpec;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One PEP 508 requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// PEP 503 normalized.
    pub name: String,
    /// Comma-joined specifiers, whitespace removed; empty for "any".
    pub specifier: String,
    pub extras: Vec<String>,
    pub marker: Option<String>,
}

impl Requirement {
    /// Parse `requests[socks]>=2.31,<3 ; python_version >= "3.8"`.
    ///
    /// # Errors
    /// Returns `PKG_REQUIREMENT_INVALID` for a malformed line or a direct
    /// URL reference.
    pub fn parse(line: &str) -> Result<Self, PkgError> {
        let (body, marker) = match line.split_once(';') {
            Some((body, marker)) => (body.trim(), Some(marker.trim().to_string())),
            None => (line.trim(), None),
        };

        if body.contains("://") || body.contains('@') {
            return Err(PkgError::requirement_invalid(format!(
                "Direct references are not supported: '{body}'"
            )));
        }

        let name_end = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(body.len());
        let (name, mut rest) = body.split_at(name_end);
        if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(PkgError::requirement_invalid(format!(
                "Missing or invalid project name in '{body}'"
            )));
        }

        let mut extras = Vec::new();
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('[') {
            let (inside, tail) = after.split_once(']').ok_or_else(|| {
                PkgError::requirement_invalid(format!("Unclosed extras in '{body}'"))
            })?;
            extras = inside
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(normalize_name)
                .collect();
            rest = tail;
        }

        let specifier: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
        let specifier = specifier
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .map_or(specifier.clone(), String::from);
        SpecifierSet::parse(&specifier).map_err(|e| {
            PkgError::requirement_invalid(format!("'{body}': {}", e.message()))
        })?;

        Ok(Self {
            name: normalize_name(name),
            specifier,
            extras,
            marker: marker.filter(|m| !m.is_empty()),
        })
    }

    /// Whether the marker restricts this requirement to an optional extra.
    #[must_use]
    pub fn is_extra_only(&self) -> bool {
        self.marker
            .as_deref()
            .is_some_and(|m| m.split(|c: char| !c.is_ascii_alphanumeric()).any(|w| w == "extra"))
    }

    #[must_use]
    pub fn to_spec(&self) -> PackageSpec {
        PackageSpec::new(self.name.clone(), self.specifier.clone())
    }
}

/// Build a dependency manifest from `Requires-Dist` lines.
///
/// Extra-only requirements are skipped. When a project is listed twice
/// (usually with different markers) the unconditional entry wins, else the
/// first one.
pub fn manifest_from_requires_dist<'a>(
    name: Option<&str>,
    version: Option<&str>,
    lines: impl IntoIterator<Item = &'a str>,
) -> PackageManifest {
    let mut manifest = PackageManifest {
        name: name.map(normalize_name),
        version: version.map(String::from),
        ..PackageManifest::default()
    };

    // name -> (specifier, has_marker)
    let mut picked: BTreeMap<String, (String, bool)> = BTreeMap::new();
    for line in lines {
        let requirement = match Requirement::parse(line) {
            Ok(requirement) => requirement,
            Err(e) => {
                manifest
                    .errors
                    .push(PkgDepError::new(line, e.code(), e.message()));
                continue;
            }
        };
        if requirement.is_extra_only() {
            continue;
        }

        let has_marker = requirement.marker.is_some();
        match picked.entry(requirement.name) {
            Entry::Vacant(slot) => {
                slot.insert((requirement.specifier, has_marker));
            }
            Entry::Occupied(mut slot) if slot.get().1 && !has_marker => {
                slot.insert((requirement.specifier, false));
            }
            Entry::Occupied(_) => {}
        }
    }

    manifest.dependencies = picked
        .into_iter()
        .map(|(name, (specifier, _))| (name, specifier))
        .collect();
    manifest
}

/// Requirements read from one or more files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementsFile {
    pub requirements: Vec<Requirement>,
    /// Lines that could not be used.
    pub errors: Vec<PkgDepError>,
}

impl RequirementsFile {
    /// Read a requirements file, following `-r` includes.
    ///
    /// # Errors
    /// Returns `PKG_REQUIREMENTS_NOT_FOUND` if `path` cannot be read. A
    /// missing included file is recorded in `errors` instead.
    pub fn read_from(path: &Path) -> Result<Self, PkgError> {
        let mut file = Self::default();
        let mut seen = HashSet::new();
        let content =
            fs::read_to_string(path).map_err(|_| PkgError::requirements_not_found(path))?;
        file.absorb(path, &content, &mut seen);
        Ok(file)
    }

    /// Parse requirement lines without following includes.
    #[must_use]
    pub fn parse_str(content: &str) -> Self {
        let mut file = Self::default();
        for line in logical_lines(content) {
            file.absorb_line(&line, None, &mut HashSet::new());
        }
        file
    }

    /// Append another file's requirements.
    pub fn merge(&mut self, other: Self) {
        self.requirements.extend(other.requirements);
        self.errors.extend(other.errors);
    }

    fn absorb(&mut self, path: &Path, content: &str, seen: &mut HashSet<PathBuf>) {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !seen.insert(key) {
            return;
        }
        for line in logical_lines(content) {
            self.absorb_line(&line, path.parent(), seen);
        }
    }

    fn absorb_line(&mut self, line: &str, base: Option<&Path>, seen: &mut HashSet<PathBuf>) {
        if let Some(target) = include_target(line) {
            match base {
                Some(base) => {
                    let included = base.join(target);
                    match fs::read_to_string(&included) {
                        Ok(content) => self.absorb(&included, &content, seen),
                        Err(_) => self.errors.push(PkgDepError::new(
                            line,
                            codes::PKG_REQUIREMENTS_NOT_FOUND,
                            format!("included file not found: {}", included.display()),
                        )),
                    }
                }
                None => self.errors.push(PkgDepError::new(
                    line,
                    codes::PKG_REQUIREMENT_INVALID,
                    "includes are only followed when reading from a file",
                )),
            }
            return;
        }

        if line.starts_with("-e") || line.starts_with("--editable") {
            self.errors.push(PkgDepError::new(
                line,
                codes::PKG_REQUIREMENT_INVALID,
                "editable requirements are not supported",
            ));
            return;
        }
        // Constraints files, index options, hashes and other pip flags
        if line.starts_with('-') {
            return;
        }

        match Requirement::parse(line) {
            Ok(requirement) => self.requirements.push(requirement),
            Err(e) => self
                .errors
                .push(PkgDepError::new(line, e.code(), e.message())),
        }
    }
}

/// `-r other.txt`, `-rother.txt`, `--requirement other.txt`, `--requirement=other.txt`.
fn include_target(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("--requirement")
        .map(|r| r.strip_prefix('=').unwrap_or(r))
        .or_else(|| line.strip_prefix("-r"))?;
    let target = rest.trim();
    (!target.is_empty()).then_some(target)
}

/// Lines with comments stripped and `\` continuations joined; blanks dropped.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending = String::new();

    for raw in content.lines() {
        let line = strip_comment(raw);
        if let Some(head) = line.trim_end().strip_suffix('\\') {
            pending.push_str(head);
            pending.push(' ');
            continue;
        }
        pending.push_str(line);
        let joined = pending.trim().to_string();
        pending.clear();
        if !joined.is_empty() {
            lines.push(joined);
        }
    }
    let tail = pending.trim();
    if !tail.is_empty() {
        lines.push(tail.to_string());
    }
    lines
}

/// `#` starts a comment at line start or after whitespace.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

/// `requirements*.txt` files directly inside `dir`, sorted.
#[must_use]
pub fn find_requirements_files(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            name.starts_with("requirements") && name.ends_with(".txt")
        })
        .map(walkdir::DirEntry::into_path)
        .collect();
    found.sort();
    found
}
