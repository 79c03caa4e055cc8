//! Crash-safe file replacement.
//!
//! Compressed outputs are written under a hidden temp name in the same
//! directory and renamed into place once complete, so a file with the final
//! name is always whole.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Prefix shared by every temp file.
pub const TEMP_PREFIX: &str = ".tmp.";

/// Generate a temp path for atomic writes.
/// Format: {dir}/.tmp.{random}.{filename}
pub fn temp_path(final_path: &Path) -> PathBuf {
    let filename = final_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let random: u64 = rand::random();
    let temp_name = format!("{}{:016x}.{}", TEMP_PREFIX, random, filename);
    final_path.with_file_name(temp_name)
}

/// True for names produced by [`temp_path`].
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Atomically rename temp file to final path, replacing it if present.
/// The temp file is removed if the rename fails.
pub fn rename_into_place(temp_path: &Path, final_path: &Path) -> io::Result<()> {
    match fs::rename(temp_path, final_path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(temp_path);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path() {
        let final_path = Path::new("/tmp/out/2023-01/rust.zst");
        let temp = temp_path(final_path);

        // Temp path should be in same directory
        assert_eq!(temp.parent(), final_path.parent());

        let filename = temp.file_name().unwrap().to_str().unwrap();
        assert!(is_temp_name(filename));
        assert!(filename.ends_with(".rust.zst"));
    }

    #[test]
    fn test_temp_paths_differ() {
        let final_path = Path::new("/tmp/out/a.zst");
        assert_ne!(temp_path(final_path), temp_path(final_path));
    }

    #[test]
    fn test_rename_replaces_existing() {
        let tmp = TempDir::new().unwrap();
        let final_path = tmp.path().join("a.zst");
        fs::write(&final_path, b"old").unwrap();

        let temp = temp_path(&final_path);
        fs::write(&temp, b"new").unwrap();
        rename_into_place(&temp, &final_path).unwrap();

        assert_eq!(fs::read(&final_path).unwrap(), b"new");
        assert!(!temp.exists());
    }

    #[test]
    fn test_failed_rename_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let temp = tmp.path().join(".tmp.0000000000000000.a.zst");
        fs::write(&temp, b"data").unwrap();

        let missing_dir = tmp.path().join("missing/a.zst");
        assert!(rename_into_place(&temp, &missing_dir).is_err());
        assert!(!temp.exists());
    }
}
