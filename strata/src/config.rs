//! Configuration for a rebucket run.
//!
//! Config file resolution order:
//! 1. Explicit path passed to `Config::load_from()`
//! 2. REBUCKET_CONFIG environment variable
//! 3. Default: <XDG config dir>/rebucket/config.toml

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::record::Projection;
use crate::{Error, Result};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "REBUCKET_CONFIG";

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the compressed source tree.
    pub input_root: PathBuf,

    /// Root of the re-bucketed output tree.
    pub output_root: PathBuf,

    /// Prefix stripped from source file names to derive the time bucket.
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,

    /// Extension of source files (without the dot). Also stripped as the suffix.
    #[serde(default = "default_source_extension")]
    pub source_extension: String,

    /// Optional glob applied to source file names.
    #[serde(default)]
    pub source_pattern: Option<String>,

    /// Descend into subdirectories of `input_root`.
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Rows held in memory per source file before flushing to disk.
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,

    /// Maximum number of source files processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Soft deadline for one source file, in seconds.
    #[serde(default = "default_file_timeout_secs")]
    pub file_timeout_secs: u64,

    /// Lines read between two deadline checks.
    #[serde(default = "default_timeout_check_interval")]
    pub timeout_check_interval: u64,

    /// Longest accepted line, in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    /// zstd decoder window limit (log2). Dumps are compressed with long windows.
    #[serde(default = "default_max_window_log")]
    pub max_window_log: u32,

    /// JSON field holding the record category.
    #[serde(default = "default_category_field")]
    pub category_field: String,

    /// JSON field holding the record timestamp.
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,

    /// CSV of categories to keep (`name` column). Unset keeps every category.
    #[serde(default)]
    pub category_allowlist: Option<PathBuf>,

    /// What gets written for each record.
    #[serde(default)]
    pub projection: Projection,

    /// Extension of the uncompressed partition files.
    #[serde(default = "default_output_extension")]
    pub output_extension: String,

    /// Extension of the recompressed partition files.
    #[serde(default = "default_compressed_extension")]
    pub compressed_extension: String,

    /// zstd level used by the recompression pass.
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Threads used by the recompression pass.
    #[serde(default = "default_recompress_workers")]
    pub recompress_workers: usize,

    /// Decode every new compressed frame and compare it to the original
    /// before deleting the original.
    #[serde(default = "default_true")]
    pub verify_roundtrip: bool,
}

fn default_source_prefix() -> String {
    "RS_".to_string()
}

fn default_source_extension() -> String {
    "zst".to_string()
}

fn default_true() -> bool {
    true
}

fn default_chunk_rows() -> usize {
    50_000
}

fn default_workers() -> usize {
    4
}

fn default_file_timeout_secs() -> u64 {
    5 * 60
}

fn default_timeout_check_interval() -> u64 {
    1_000
}

fn default_max_line_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_max_window_log() -> u32 {
    31
}

fn default_category_field() -> String {
    "subreddit".to_string()
}

fn default_timestamp_field() -> String {
    "created_utc".to_string()
}

fn default_output_extension() -> String {
    "jsonl".to_string()
}

fn default_compressed_extension() -> String {
    "zst".to_string()
}

fn default_compression_level() -> i32 {
    3
}

fn default_recompress_workers() -> usize {
    1
}

impl Config {
    /// Create a config with default settings for the given roots.
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            source_prefix: default_source_prefix(),
            source_extension: default_source_extension(),
            source_pattern: None,
            recursive: true,
            chunk_rows: default_chunk_rows(),
            workers: default_workers(),
            file_timeout_secs: default_file_timeout_secs(),
            timeout_check_interval: default_timeout_check_interval(),
            max_line_bytes: default_max_line_bytes(),
            max_window_log: default_max_window_log(),
            category_field: default_category_field(),
            timestamp_field: default_timestamp_field(),
            category_allowlist: None,
            projection: Projection::default(),
            output_extension: default_output_extension(),
            compressed_extension: default_compressed_extension(),
            compression_level: default_compression_level(),
            recompress_workers: default_recompress_workers(),
            verify_roundtrip: true,
        }
    }

    /// Load config from the default location (see module docs).
    ///
    /// Returns `Ok(None)` if no config file exists there.
    pub fn load() -> Result<Option<Self>> {
        Self::load_optional(&default_config_path()?)
    }

    /// Load config from `path` if the file exists.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if path.exists() {
            Self::load_from(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Load config from a specific TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Save config as TOML, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = self.to_toml()?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Render the config as pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_rows == 0 {
            return Err(Error::Config("chunk_rows must be at least 1".to_string()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.recompress_workers == 0 {
            return Err(Error::Config("recompress_workers must be at least 1".to_string()));
        }
        if self.max_line_bytes == 0 {
            return Err(Error::Config("max_line_bytes must be at least 1".to_string()));
        }
        if self.timeout_check_interval == 0 {
            return Err(Error::Config(
                "timeout_check_interval must be at least 1".to_string(),
            ));
        }
        for (name, ext) in [
            ("source_extension", &self.source_extension),
            ("output_extension", &self.output_extension),
            ("compressed_extension", &self.compressed_extension),
        ] {
            if ext.is_empty() || ext.contains(['/', '\\', '.']) {
                return Err(Error::Config(format!("{} is not a valid extension: {:?}", name, ext)));
            }
        }
        if self.output_extension == self.compressed_extension {
            return Err(Error::Config(
                "output_extension and compressed_extension must differ".to_string(),
            ));
        }
        if self.input_root == self.output_root {
            return Err(Error::Config(format!(
                "input_root and output_root are both {}",
                self.input_root.display()
            )));
        }
        Ok(())
    }

    /// Soft deadline for one source file.
    pub fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.file_timeout_secs)
    }

    // Path helpers

    /// Directory holding every partition of one time bucket.
    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.output_root.join(bucket)
    }

    /// Uncompressed partition file for (bucket, key).
    pub fn partition_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_dir(bucket)
            .join(format!("{}.{}", key, self.output_extension))
    }

    /// Recompressed partition file for (bucket, key).
    pub fn compressed_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_dir(bucket)
            .join(format!("{}.{}", key, self.compressed_extension))
    }
}

/// Resolve the default config file path.
pub fn default_config_path() -> Result<PathBuf> {
    // 1. Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }

    // 2. XDG config directory (via directories crate)
    if let Some(proj_dirs) = ProjectDirs::from("", "", "rebucket") {
        return Ok(proj_dirs.config_dir().join("config.toml"));
    }

    // 3. Fallback to ~/.config/rebucket
    let home = std::env::var("HOME")
        .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;
    Ok(PathBuf::from(home).join(".config/rebucket/config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let config = Config::new("/data/dumps", "/data/organized");
        assert_eq!(config.chunk_rows, 50_000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.file_timeout(), Duration::from_secs(300));
        assert_eq!(config.max_line_bytes, 10 * 1024 * 1024);
        assert_eq!(config.projection, Projection::Full);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partition_paths() {
        let config = Config::new("/data/dumps", "/data/organized");
        assert_eq!(
            config.partition_path("2023-01", "AskReddit"),
            PathBuf::from("/data/organized/2023-01/AskReddit.jsonl")
        );
        assert_eq!(
            config.compressed_path("2023-01", "AskReddit"),
            PathBuf::from("/data/organized/2023-01/AskReddit.zst")
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::new("/in", "/out");
        config.chunk_rows = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::new("/in", "/out");
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::new("/in", "/out");
        config.compressed_extension = "jsonl".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::new("/in", "/out");
        config.output_extension = ".jsonl".to_string();
        assert!(config.validate().is_err());

        let config = Config::new("/same", "/same");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/config.toml");

        let mut config = Config::new("/in", "/out");
        config.workers = 8;
        config.projection = Projection::Compact;
        config.source_pattern = Some("RS_2023-*".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "input_root = \"/in\"\noutput_root = \"/out\"\nchunk_rows = 10\n",
        )
        .unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.chunk_rows, 10);
        assert_eq!(loaded.workers, 4);
        assert_eq!(loaded.source_prefix, "RS_");
        assert!(loaded.verify_roundtrip);
    }

    #[test]
    fn test_load_optional_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("not-yet.toml");
        assert_eq!(Config::load_optional(&path).unwrap(), None);

        let mut config = Config::new("/in", "/out");
        config.category_allowlist = Some(PathBuf::from("/etc/allow.csv"));
        config.save(&path).unwrap();
        assert_eq!(Config::load_optional(&path).unwrap(), Some(config));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "input_root = [").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
