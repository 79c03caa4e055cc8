//! Source file discovery and time bucket derivation.

use std::fs;
use std::path::{Path, PathBuf};

use glob_match::glob_match;
use log::{debug, warn};

use crate::{Config, Error, Result};

/// One compressed input file and the bucket its records land in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub bucket: String,
}

impl SourceFile {
    /// Build a source from a path, deriving the bucket from its file name.
    pub fn from_path(path: impl Into<PathBuf>, config: &Config) -> Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
        let bucket = time_bucket(name, &config.source_prefix, &config.source_extension)
            .ok_or_else(|| {
                Error::InvalidPath(format!("{} does not name a time bucket", path.display()))
            })?;
        Ok(Self { path, bucket })
    }
}

/// Derive the time bucket from a source file name.
///
/// `RS_2023-01.zst` with prefix `RS_` and extension `zst` gives `2023-01`.
/// A missing prefix is tolerated; a name that leaves nothing usable is not.
pub fn time_bucket(file_name: &str, prefix: &str, extension: &str) -> Option<String> {
    let stem = file_name
        .strip_suffix(extension)
        .and_then(|s| s.strip_suffix('.'))
        .unwrap_or(file_name);
    let label = stem.strip_prefix(prefix).unwrap_or(stem);

    if label.is_empty() || label == "." || label == ".." || label.contains(['/', '\\']) {
        return None;
    }
    Some(label.to_string())
}

/// List every source file under `config.input_root`, sorted by path.
///
/// An unreadable input root is fatal. Unreadable subdirectories and file
/// names without a usable bucket are logged and skipped. The output root is
/// never descended into.
pub fn discover_sources(config: &Config) -> Result<Vec<SourceFile>> {
    let root = &config.input_root;
    let entries = fs::read_dir(root).map_err(|source| Error::Discovery {
        path: root.clone(),
        source,
    })?;

    let mut paths = Vec::new();
    collect_files(entries, config, &mut paths);
    paths.sort();

    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        match SourceFile::from_path(&path, config) {
            Ok(source) => sources.push(source),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    debug!("Discovered {} source files under {}", sources.len(), root.display());
    Ok(sources)
}

fn collect_files(entries: fs::ReadDir, config: &Config, out: &mut Vec<PathBuf>) {
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", config.input_root.display(), e);
                continue;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if file_type.is_dir() {
            if !config.recursive || is_same_dir(&path, &config.output_root) {
                continue;
            }
            match fs::read_dir(&path) {
                Ok(sub) => collect_files(sub, config, out),
                Err(e) => warn!("Skipping unreadable directory {}: {}", path.display(), e),
            }
        } else if is_source_name(&entry.file_name().to_string_lossy(), config) {
            out.push(path);
        }
    }
}

fn is_source_name(name: &str, config: &Config) -> bool {
    let has_extension = name
        .strip_suffix(config.source_extension.as_str())
        .is_some_and(|stem| stem.ends_with('.'));
    if !has_extension {
        return false;
    }
    match &config.source_pattern {
        Some(pattern) => glob_match(pattern, name),
        None => true,
    }
}

fn is_same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_time_bucket() {
        assert_eq!(time_bucket("RS_2023-01.zst", "RS_", "zst").as_deref(), Some("2023-01"));
        assert_eq!(time_bucket("RC_2023-01.zst", "RC_", "zst").as_deref(), Some("2023-01"));
        // Missing prefix is tolerated.
        assert_eq!(time_bucket("2023-01.zst", "RS_", "zst").as_deref(), Some("2023-01"));
        // Only the final extension is stripped.
        assert_eq!(
            time_bucket("RS_2023-01.jsonl.zst", "RS_", "zst").as_deref(),
            Some("2023-01.jsonl")
        );
        assert_eq!(time_bucket("RS_.zst", "RS_", "zst"), None);
        assert_eq!(time_bucket(".zst", "RS_", "zst"), None);
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("dumps");
        touch(&input.join("RS_2023-02.zst"));
        touch(&input.join("RS_2023-01.zst"));
        touch(&input.join("notes.txt"));
        touch(&input.join("RS_2023-03.zst.part"));
        touch(&input.join("nested/RS_2022-12.zst"));

        let config = Config::new(&input, tmp.path().join("out"));
        let sources = discover_sources(&config).unwrap();
        let buckets: Vec<_> = sources.iter().map(|s| s.bucket.as_str()).collect();
        assert_eq!(buckets, vec!["2023-01", "2023-02", "2022-12"]);
    }

    #[test]
    fn test_discover_non_recursive() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("dumps");
        touch(&input.join("RS_2023-01.zst"));
        touch(&input.join("nested/RS_2022-12.zst"));

        let mut config = Config::new(&input, tmp.path().join("out"));
        config.recursive = false;
        let sources = discover_sources(&config).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].bucket, "2023-01");
    }

    #[test]
    fn test_discover_skips_nested_output_root() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("dumps");
        touch(&input.join("RS_2023-01.zst"));
        // A previous run's output living inside the input tree.
        touch(&input.join("organized/2023-01/rust.zst"));

        let config = Config::new(&input, input.join("organized"));
        let sources = discover_sources(&config).unwrap();
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn test_discover_with_pattern() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("dumps");
        touch(&input.join("RS_2023-01.zst"));
        touch(&input.join("RS_2022-01.zst"));
        touch(&input.join("RC_2023-01.zst"));

        let mut config = Config::new(&input, tmp.path().join("out"));
        config.source_pattern = Some("RS_2023-*".to_string());
        let sources = discover_sources(&config).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].path.ends_with("RS_2023-01.zst"));
    }

    #[test]
    fn test_discover_missing_root_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let config = Config::new(tmp.path().join("missing"), tmp.path().join("out"));
        assert!(matches!(
            discover_sources(&config),
            Err(Error::Discovery { .. })
        ));
    }
}
