//! Package spec parsing.
//!
//! A spec is an unresolved requirement: a package name plus a version range,
//! tag, or nothing (meaning "latest"). Parses strings like:
//! - `react`
//! - `react@^18.0.0`
//! - `@types/node`
//! - `@types/node@^20`

use super::error::PkgError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// npm's limit on package name length.
const MAX_NAME_LEN: usize = 214;

/// Split `@scope/bare` into `(Some("scope"), "bare")`; unscoped names give
/// `(None, name)`.
#[must_use]
pub fn split_scope(name: &str) -> (Option<&str>, &str) {
    name.strip_prefix('@')
        .and_then(|rest| rest.split_once('/'))
        .map_or((None, name), |(scope, bare)| (Some(scope), bare))
}

/// An unresolved package requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageSpec {
    /// Full package name (e.g., "@scope/name" or "name").
    pub name: String,
    /// Version range or tag. Empty means latest.
    #[serde(default)]
    pub range: String,
}

impl PackageSpec {
    /// Create a spec from a name and a range (empty range = latest).
    #[must_use]
    pub fn new(name: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: range.into(),
        }
    }

    /// Parse a package specification string.
    ///
    /// # Errors
    /// Returns an error if the spec is invalid.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(PkgError::spec_invalid("Empty package spec"));
        }

        if input.starts_with('@') {
            Self::parse_scoped(input)
        } else {
            Self::parse_unscoped(input)
        }
    }

    fn parse_scoped(input: &str) -> Result<Self, PkgError> {
        let Some(slash_pos) = input.find('/') else {
            return Err(PkgError::spec_invalid(format!(
                "Invalid scoped package: missing '/' in '{input}'"
            )));
        };

        if slash_pos == 1 {
            return Err(PkgError::spec_invalid(format!(
                "Invalid scoped package: empty scope in '{input}'"
            )));
        }

        Self::validate_name(&input[1..slash_pos])?;

        let after_slash = &input[slash_pos + 1..];
        let (pkg_name, range) = match after_slash.find('@') {
            Some(at_pos) => (&after_slash[..at_pos], Some(&after_slash[at_pos + 1..])),
            None => (after_slash, None),
        };

        if pkg_name.is_empty() {
            return Err(PkgError::spec_invalid(format!(
                "Invalid scoped package: empty name in '{input}'"
            )));
        }
        Self::validate_name(pkg_name)?;

        Ok(Self {
            name: format!("{}/{pkg_name}", &input[..slash_pos]),
            range: Self::checked_range(input, range)?,
        })
    }

    fn parse_unscoped(input: &str) -> Result<Self, PkgError> {
        let (name, range) = match input.find('@') {
            Some(at_pos) => (&input[..at_pos], Some(&input[at_pos + 1..])),
            None => (input, None),
        };

        if name.is_empty() {
            return Err(PkgError::spec_invalid(format!(
                "Invalid package spec: empty name in '{input}'"
            )));
        }
        Self::validate_name(name)?;

        Ok(Self {
            name: name.to_string(),
            range: Self::checked_range(input, range)?,
        })
    }

    /// `name@` is rejected; a missing `@` means latest.
    fn checked_range(input: &str, range: Option<&str>) -> Result<String, PkgError> {
        match range {
            Some("") => Err(PkgError::spec_invalid(format!(
                "Invalid package spec: empty version range in '{input}'"
            ))),
            Some(range) => Ok(range.to_string()),
            None => Ok(String::new()),
        }
    }

    /// Check a full package name (`name` or `@scope/name`).
    ///
    /// Names reach registry URLs and artifact paths, so anything that could
    /// leave a directory (`..`, `/`, `\`, a leading `.`) is rejected.
    ///
    /// # Errors
    /// Returns `PKG_SPEC_INVALID` describing the first problem found.
    pub fn check_name(name: &str) -> Result<(), PkgError> {
        if name.is_empty() {
            return Err(PkgError::spec_invalid("Package name cannot be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(PkgError::spec_invalid(format!(
                "Package name longer than {MAX_NAME_LEN} characters: '{name}'"
            )));
        }

        match split_scope(name) {
            (Some(scope), bare) => {
                Self::validate_name(scope)?;
                Self::validate_name(bare)
            }
            (None, _) if name.starts_with('@') => Err(PkgError::spec_invalid(format!(
                "Invalid scoped package: missing '/' in '{name}'"
            ))),
            (None, bare) => Self::validate_name(bare),
        }
    }

    /// One name segment: no separators, no leading dot.
    fn validate_name(name: &str) -> Result<(), PkgError> {
        if name.is_empty() {
            return Err(PkgError::spec_invalid("Package name segment cannot be empty"));
        }
        if name.starts_with('.') {
            return Err(PkgError::spec_invalid(format!(
                "Package name '{name}' cannot start with '.'"
            )));
        }
        for c in name.chars() {
            if !c.is_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid character '{c}' in package name '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Whether the range asks for "anything" (empty, `*`, `latest`).
    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(self.range.trim(), "" | "*" | "latest")
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.range.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.range)
        }
    }
}
