//! npm lockfile reading.
//!
//! A prior `package-lock.json` is a resolution snapshot: every identity it
//! lists is already known, so the mirror can seed them directly instead of
//! re-querying the registry, and every `peerDependencies` range it declares
//! becomes an extra requirement to resolve.
//!
//! ## Supported formats
//!
//! - `lockfileVersion` 1: nested `dependencies` tree
//! - `lockfileVersion` 2 and 3: flat `packages` map keyed by install path
//!   (`node_modules/a/node_modules/@scope/b`); v2 also carries the v1 tree,
//!   the flat map wins when present

use super::spec::PackageSpec;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Conventional lockfile name.
pub const NPM_LOCKFILE_NAME: &str = "package-lock.json";

/// Lockfile error codes.
pub mod codes {
    /// Lockfile not found at the expected path.
    pub const PKG_LOCK_NOT_FOUND: &str = "PKG_LOCK_NOT_FOUND";
    /// Lockfile has invalid JSON.
    pub const PKG_LOCK_INVALID_JSON: &str = "PKG_LOCK_INVALID_JSON";
    /// Lockfile version is not one we understand.
    pub const PKG_LOCK_VERSION_UNSUPPORTED: &str = "PKG_LOCK_VERSION_UNSUPPORTED";
}

/// A package pinned by the lockfile.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    /// Only reachable through devDependencies.
    pub dev: bool,
    /// Only reachable through optionalDependencies.
    pub optional: bool,
}

/// Everything the mirror needs from a lockfile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    pub lockfile_version: u32,
    /// Locked identities, deduplicated and sorted.
    pub packages: Vec<LockedPackage>,
    /// Every peer range declared anywhere in the snapshot, deduplicated.
    pub peers: Vec<PackageSpec>,
}

impl LockSnapshot {
    /// Read a lockfile from disk.
    ///
    /// # Errors
    /// Returns an error if the file is missing, is not JSON, or has an
    /// unsupported version.
    pub fn read_from(path: &Path) -> Result<Self, LockfileError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LockfileError::new(
                    codes::PKG_LOCK_NOT_FOUND,
                    format!("Lockfile not found: {}", path.display()),
                )
            } else {
                LockfileError::new(codes::PKG_LOCK_NOT_FOUND, e.to_string())
            }
        })?;
        Self::from_json_str(&content)
    }

    /// Parse lockfile JSON text.
    ///
    /// # Errors
    /// Returns an error if the text is not a supported npm lockfile.
    pub fn from_json_str(content: &str) -> Result<Self, LockfileError> {
        let value: Value = serde_json::from_str(content).map_err(|e| {
            LockfileError::new(codes::PKG_LOCK_INVALID_JSON, format!("Invalid JSON: {e}"))
        })?;

        let root = value.as_object().ok_or_else(|| {
            LockfileError::new(codes::PKG_LOCK_INVALID_JSON, "Lockfile must be a JSON object")
        })?;

        let lockfile_version = root
            .get("lockfileVersion")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(1);

        if !(1..=3).contains(&lockfile_version) {
            return Err(LockfileError::new(
                codes::PKG_LOCK_VERSION_UNSUPPORTED,
                format!("Unsupported lockfileVersion {lockfile_version}"),
            ));
        }

        let mut packages = BTreeSet::new();
        let mut peers = BTreeSet::new();

        if let Some(flat) = root.get("packages").and_then(Value::as_object) {
            collect_flat(flat, &mut packages, &mut peers);
        } else if let Some(tree) = root.get("dependencies").and_then(Value::as_object) {
            collect_tree(tree, &mut packages);
        }

        Ok(Self {
            lockfile_version,
            packages: packages.into_iter().collect(),
            peers: peers.into_iter().collect(),
        })
    }
}

/// v2/v3 `packages` map.
fn collect_flat(
    flat: &Map<String, Value>,
    packages: &mut BTreeSet<LockedPackage>,
    peers: &mut BTreeSet<PackageSpec>,
) {
    for (install_path, entry) in flat {
        let Some(entry) = entry.as_object() else {
            continue;
        };

        collect_peers(entry, peers);

        // "" is the root project and anything outside node_modules/ is a
        // workspace member; links point at those members
        let Some(installed_as) = name_from_install_path(install_path) else {
            continue;
        };
        if flag(entry, "link") {
            continue;
        }

        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .map_or(installed_as, String::from);
        let version = entry.get("version").and_then(Value::as_str);

        if let Some(version) = version {
            packages.insert(LockedPackage {
                name,
                version: version.to_string(),
                dev: flag(entry, "dev"),
                optional: flag(entry, "optional"),
            });
        }
    }
}

/// v1 nested `dependencies` tree.
fn collect_tree(tree: &Map<String, Value>, packages: &mut BTreeSet<LockedPackage>) {
    for (name, entry) in tree {
        let Some(entry) = entry.as_object() else {
            continue;
        };

        if let Some(version) = entry.get("version").and_then(Value::as_str) {
            // v1 aliases and local deps carry a URL/path instead of a version
            if !version.contains(':') {
                packages.insert(LockedPackage {
                    name: name.clone(),
                    version: version.to_string(),
                    dev: flag(entry, "dev"),
                    optional: flag(entry, "optional"),
                });
            }
        }

        if let Some(nested) = entry.get("dependencies").and_then(Value::as_object) {
            collect_tree(nested, packages);
        }
    }
}

fn collect_peers(entry: &Map<String, Value>, peers: &mut BTreeSet<PackageSpec>) {
    if let Some(section) = entry.get("peerDependencies").and_then(Value::as_object) {
        for (name, range) in section {
            if let Some(range) = range.as_str() {
                peers.insert(PackageSpec::new(name.clone(), range));
            }
        }
    }
}

fn flag(entry: &Map<String, Value>, key: &str) -> bool {
    entry.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// `node_modules/a/node_modules/@scope/b` -> `@scope/b`.
fn name_from_install_path(install_path: &str) -> Option<String> {
    let (_, name) = install_path.rsplit_once("node_modules/")?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Lockfile error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockfileError {
    code: &'static str,
    message: String,
}

impl LockfileError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LockfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for LockfileError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const V3: &str = r#"{
        "name": "app",
        "lockfileVersion": 3,
        "packages": {
            "": {
                "name": "app",
                "dependencies": { "react-dom": "^18.2.0" },
                "peerDependencies": { "typescript": ">=4.7" }
            },
            "node_modules/react-dom": {
                "version": "18.2.0",
                "peerDependencies": { "react": "^18.2.0" }
            },
            "node_modules/scheduler": { "version": "0.23.0" },
            "node_modules/react-dom/node_modules/@babel/runtime": {
                "version": "7.23.1",
                "dev": true
            },
            "node_modules/fsevents": { "version": "2.3.3", "optional": true },
            "node_modules/local-lib": { "resolved": "packages/local-lib", "link": true }
        }
    }"#;

    #[test]
    fn test_flat_packages() {
        let snapshot = LockSnapshot::from_json_str(V3).unwrap();
        assert_eq!(snapshot.lockfile_version, 3);

        let keys: Vec<String> = snapshot
            .packages
            .iter()
            .map(|p| format!("{}@{}", p.name, p.version))
            .collect();
        assert_eq!(
            keys,
            vec![
                "@babel/runtime@7.23.1",
                "fsevents@2.3.3",
                "react-dom@18.2.0",
                "scheduler@0.23.0",
            ]
        );

        let babel = &snapshot.packages[0];
        assert!(babel.dev);
        assert!(snapshot.packages[1].optional);
    }

    #[test]
    fn test_workspace_members_are_not_seeded() {
        let snapshot = LockSnapshot::from_json_str(
            r#"{
                "lockfileVersion": 3,
                "packages": {
                    "": { "name": "monorepo", "workspaces": ["packages/*"] },
                    "node_modules/my-lib": { "resolved": "packages/my-lib", "link": true },
                    "packages/my-lib": {
                        "name": "my-lib",
                        "version": "0.1.0",
                        "dependencies": { "lodash": "^4.17.0" }
                    },
                    "node_modules/lodash": { "version": "4.17.21" }
                }
            }"#,
        )
        .unwrap();

        let keys: Vec<String> = snapshot
            .packages
            .iter()
            .map(|p| format!("{}@{}", p.name, p.version))
            .collect();
        assert_eq!(keys, vec!["lodash@4.17.21"]);
    }

    #[test]
    fn test_peers_include_root_and_nested() {
        let snapshot = LockSnapshot::from_json_str(V3).unwrap();
        assert_eq!(
            snapshot.peers,
            vec![
                PackageSpec::new("react", "^18.2.0"),
                PackageSpec::new("typescript", ">=4.7"),
            ]
        );
    }

    #[test]
    fn test_v1_nested_tree() {
        let snapshot = LockSnapshot::from_json_str(
            r#"{
                "lockfileVersion": 1,
                "dependencies": {
                    "a": {
                        "version": "1.0.0",
                        "dependencies": { "b": { "version": "2.0.0" } }
                    },
                    "b": { "version": "3.0.0", "dev": true },
                    "local": { "version": "file:../local" }
                }
            }"#,
        )
        .unwrap();

        let keys: Vec<(&str, &str)> = snapshot
            .packages
            .iter()
            .map(|p| (p.name.as_str(), p.version.as_str()))
            .collect();
        assert_eq!(keys, vec![("a", "1.0.0"), ("b", "2.0.0"), ("b", "3.0.0")]);
        assert!(snapshot.peers.is_empty());
    }

    #[test]
    fn test_unsupported_version() {
        let err = LockSnapshot::from_json_str(r#"{ "lockfileVersion": 9 }"#).unwrap_err();
        assert_eq!(err.code(), codes::PKG_LOCK_VERSION_UNSUPPORTED);
    }

    #[test]
    fn test_invalid_json() {
        let err = LockSnapshot::from_json_str("{").unwrap_err();
        assert_eq!(err.code(), codes::PKG_LOCK_INVALID_JSON);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = LockSnapshot::read_from(&dir.path().join(NPM_LOCKFILE_NAME)).unwrap_err();
        assert_eq!(err.code(), codes::PKG_LOCK_NOT_FOUND);
    }

    #[test]
    fn test_name_from_install_path() {
        assert_eq!(
            name_from_install_path("node_modules/a/node_modules/@scope/b").as_deref(),
            Some("@scope/b")
        );
        assert_eq!(name_from_install_path("packages/local"), None);
    }
}
