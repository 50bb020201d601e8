use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Compute the BLAKE3 digest of a file, returning it hex-encoded.
///
/// Streams the file so large artifacts are never held in memory.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn blake3_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    update_from_file(&mut hasher, path)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Digest of a flat directory of files.
///
/// Files are visited in name order; each contributes its name and its
/// contents, so renaming a file changes the digest. Hidden entries and
/// subdirectories are ignored.
///
/// # Errors
/// Returns an error if the directory or one of its files cannot be read.
pub fn blake3_dir(path: &Path) -> io::Result<String> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') && entry.file_type()?.is_file() {
            names.push(name);
        }
    }
    names.sort();

    let mut hasher = blake3::Hasher::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        update_from_file(&mut hasher, &path.join(&name))?;
        hasher.update(&[0]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn update_from_file(hasher: &mut blake3::Hasher, path: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buffer = [0u8; 16 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buffer[..n]);
    }
}
