use crate::pkg::lockfile::NPM_LOCKFILE_NAME;
use std::path::{Path, PathBuf};

/// Find the project root by walking up from `cwd` looking for `package.json` or `.git`.
///
/// Returns the first directory containing either marker, or `None` if neither is found.
#[must_use]
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    let mut current = cwd.to_path_buf();

    loop {
        if current.join("package.json").exists() || current.join(".git").exists() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// `package.json` of the project containing `cwd`, or of `cwd` itself.
#[must_use]
pub fn default_manifest_path(cwd: &Path) -> PathBuf {
    project_root(cwd)
        .unwrap_or_else(|| cwd.to_path_buf())
        .join("package.json")
}

/// `package-lock.json` next to `manifest`, if one exists.
#[must_use]
pub fn sibling_lockfile(manifest: &Path) -> Option<PathBuf> {
    let lockfile = manifest.parent()?.join(NPM_LOCKFILE_NAME);
    lockfile.is_file().then_some(lockfile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_project_root_walks_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        let nested = dir.path().join("src").join("lib");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(project_root(&nested).as_deref(), Some(dir.path()));
        assert_eq!(default_manifest_path(&nested), dir.path().join("package.json"));
    }

    #[test]
    fn test_sibling_lockfile() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("package.json");
        assert!(sibling_lockfile(&manifest).is_none());

        fs::write(dir.path().join(NPM_LOCKFILE_NAME), "{}").unwrap();
        assert_eq!(sibling_lockfile(&manifest), Some(dir.path().join(NPM_LOCKFILE_NAME)));
    }
}
