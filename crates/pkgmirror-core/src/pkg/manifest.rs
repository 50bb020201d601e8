//! `package.json` dependency extraction.
//!
//! The same shape describes three things: the project manifest the mirror is
//! seeded from, a version entry inside a registry packument, and the manifest
//! embedded in a downloaded tarball. Extraction is lenient: a malformed entry
//! is reported in `errors` and skipped instead of failing the whole document.

use super::error::{codes, PkgError};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Dependency sections of a package manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub dependencies: BTreeMap<String, String>,
    pub optional_dependencies: BTreeMap<String, String>,
    pub peer_dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
    /// Entries that could not be read.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PkgDepError>,
}

/// Error encountered while extracting a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PkgDepError {
    /// Package name or section name.
    pub name: String,
    pub code: &'static str,
    pub message: String,
}

impl PkgDepError {
    #[must_use]
    pub fn new(name: impl Into<String>, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code,
            message: message.into(),
        }
    }

    /// Create an invalid range error.
    #[must_use]
    pub fn invalid_range(name: &str, actual_type: &str) -> Self {
        Self::new(
            name,
            codes::PKG_DEP_RANGE_INVALID,
            format!("expected string, got {actual_type}"),
        )
    }

    /// Create an invalid section error.
    #[must_use]
    pub fn invalid_section(section: &str, actual_type: &str) -> Self {
        Self::new(
            section,
            codes::PKG_PACKAGE_JSON_INVALID,
            format!("'{section}' must be an object, got {actual_type}"),
        )
    }
}

impl PackageManifest {
    /// Extract dependency sections from a parsed JSON document.
    ///
    /// # Errors
    /// Returns an error if the document is not a JSON object.
    pub fn from_value(value: &Value) -> Result<Self, PkgError> {
        let root = value
            .as_object()
            .ok_or_else(|| PkgError::package_json_invalid("manifest must be a JSON object"))?;

        let mut manifest = Self {
            name: root.get("name").and_then(Value::as_str).map(String::from),
            version: root.get("version").and_then(Value::as_str).map(String::from),
            ..Self::default()
        };

        manifest.dependencies = extract_section(root, "dependencies", &mut manifest.errors);
        manifest.optional_dependencies =
            extract_section(root, "optionalDependencies", &mut manifest.errors);
        manifest.peer_dependencies =
            extract_section(root, "peerDependencies", &mut manifest.errors);
        manifest.dev_dependencies = extract_section(root, "devDependencies", &mut manifest.errors);

        Ok(manifest)
    }

    /// Parse a manifest from JSON text.
    ///
    /// # Errors
    /// Returns an error if the text is not a JSON object.
    pub fn from_json_str(content: &str) -> Result<Self, PkgError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| PkgError::package_json_invalid(format!("Invalid JSON: {e}")))?;
        Self::from_value(&value)
    }

    /// Read a project's `package.json`.
    ///
    /// # Errors
    /// Returns `PkgError` if the file is missing, unreadable, or not a JSON object.
    pub fn read_from(path: &Path) -> Result<Self, PkgError> {
        if !path.exists() {
            return Err(PkgError::package_json_not_found(path));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| PkgError::package_json_invalid(format!("Failed to read: {e}")))?;
        Self::from_json_str(&content)
    }

    /// `name@version` when both are present.
    #[must_use]
    pub fn identity_key(&self) -> Option<String> {
        Some(format!("{}@{}", self.name.as_ref()?, self.version.as_ref()?))
    }
}

/// Extract one `{name: range}` section, recording malformed entries.
fn extract_section(
    root: &serde_json::Map<String, Value>,
    section: &str,
    errors: &mut Vec<PkgDepError>,
) -> BTreeMap<String, String> {
    let mut deps = BTreeMap::new();

    let Some(section_value) = root.get(section) else {
        return deps;
    };

    let Some(section_obj) = section_value.as_object() else {
        errors.push(PkgDepError::invalid_section(
            section,
            json_type_name(section_value),
        ));
        return deps;
    };

    for (name, range_value) in section_obj {
        if let Some(range) = range_value.as_str() {
            deps.insert(name.clone(), range.to_string());
        } else {
            errors.push(PkgDepError::invalid_range(
                name,
                json_type_name(range_value),
            ));
        }
    }

    deps
}

/// Get a human-readable type name for a JSON value.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_all_sections() {
        let manifest = PackageManifest::from_json_str(
            r#"{
                "name": "app",
                "version": "1.0.0",
                "dependencies": { "a": "^1.0.0" },
                "optionalDependencies": { "fsevents": "^2.3.0" },
                "peerDependencies": { "react": ">=17" },
                "devDependencies": { "typescript": "^5.0.0" }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.identity_key().as_deref(), Some("app@1.0.0"));
        assert_eq!(manifest.dependencies["a"], "^1.0.0");
        assert_eq!(manifest.optional_dependencies["fsevents"], "^2.3.0");
        assert_eq!(manifest.peer_dependencies["react"], ">=17");
        assert_eq!(manifest.dev_dependencies["typescript"], "^5.0.0");
        assert!(manifest.errors.is_empty());
    }

    #[test]
    fn test_invalid_range_type_is_skipped() {
        let manifest = PackageManifest::from_json_str(
            r#"{ "dependencies": { "good": "1.0.0", "bad": 42 } }"#,
        )
        .unwrap();

        assert_eq!(manifest.dependencies.len(), 1);
        assert_eq!(manifest.errors.len(), 1);
        assert_eq!(manifest.errors[0].name, "bad");
        assert_eq!(manifest.errors[0].code, codes::PKG_DEP_RANGE_INVALID);
        assert!(manifest.errors[0].message.contains("number"));
    }

    #[test]
    fn test_invalid_section_type() {
        let manifest =
            PackageManifest::from_json_str(r#"{ "dependencies": ["a", "b"] }"#).unwrap();
        assert!(manifest.dependencies.is_empty());
        assert_eq!(manifest.errors[0].code, codes::PKG_PACKAGE_JSON_INVALID);
    }

    #[test]
    fn test_non_object_root() {
        assert!(PackageManifest::from_json_str("[]").is_err());
        assert!(PackageManifest::from_json_str("{ nope").is_err());
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let err = PackageManifest::read_from(&dir.path().join("package.json")).unwrap_err();
        assert_eq!(err.code(), codes::PKG_PACKAGE_JSON_NOT_FOUND);
    }

    #[test]
    fn test_read_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("package.json");
        fs::write(&path, r#"{ "dependencies": { "left-pad": "^1.3.0" } }"#).unwrap();

        let manifest = PackageManifest::read_from(&path).unwrap();
        assert_eq!(manifest.dependencies["left-pad"], "^1.3.0");
        assert_eq!(manifest.identity_key(), None);
    }
}
