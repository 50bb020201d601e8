use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-process counter so concurrent writers never share a temp file.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Build a hidden temp path next to `path` (same filesystem, so rename is atomic).
#[must_use]
pub fn temp_sibling(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    parent.join(format!(
        ".{}.tmp.{}.{n}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ))
}

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// Readers observe either no file or the complete contents, never a partial
/// artifact. Parent directories are created as needed.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = temp_sibling(path);

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Windows refuses to rename over an existing file.
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

/// Atomically publish a directory of files.
///
/// The files are written into a hidden temp sibling which is then renamed
/// to `path`, so readers see either no directory or every file. If another
/// writer publishes `path` first, its directory is kept.
///
/// # Errors
/// Returns an error if a file name is not a plain name, or if a write or
/// the rename fails.
pub fn atomic_write_dir(path: &Path, files: &[(&str, &[u8])]) -> io::Result<()> {
    for (name, _) in files {
        let plain = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\'])
            && Path::new(name).file_name() == Some(std::ffi::OsStr::new(name));
        if !plain {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a plain file name: {name}"),
            ));
        }
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_dir = temp_sibling(path);
    let result = (|| {
        fs::create_dir(&temp_dir)?;
        for (name, bytes) in files {
            let mut file = File::create(temp_dir.join(name))?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp_dir, path)
    })();

    match result {
        Ok(()) => Ok(()),
        Err(_) if path.is_dir() => {
            let _ = fs::remove_dir_all(&temp_dir);
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_dir_all(&temp_dir);
            Err(e)
        }
    }
}
