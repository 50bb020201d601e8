//! PyPI collaborators.
//!
//! The same engine mirrors Python projects: [`PypiClient`] answers
//! version and dependency queries from the JSON API, [`PypiFetcher`] stores
//! the selected distribution files of a release in one directory, and
//! [`SdistMetadataReader`] feeds `Requires-Dist` from mirrored sdists back
//! into introspection.

pub mod fetch;
pub mod registry;
pub mod requirements;
pub mod version;
pub mod wheel;

pub use fetch::{read_sdist_metadata, PypiFetcher, SdistMetadataReader};
pub use registry::{PypiClient, ReleaseFile, DEFAULT_INDEX, INDEX_ENV};
pub use requirements::{find_requirements_files, Requirement, RequirementsFile};
pub use version::{Pep440Version, SpecifierSet};
pub use wheel::{PythonVersion, WheelTarget};

/// PEP 503 normalization: lowercase, runs of `-`, `_` and `.` become `-`.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                normalized.push('-');
            }
            in_separator = true;
        } else {
            normalized.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Requests"), "requests");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("Foo__Bar-.baz"), "foo-bar-baz");
        assert_eq!(normalize_name("  six "), "six");
    }
}
