//! Recompression pass over the output tree.
//!
//! Every `<key>.<output_extension>` partition file becomes
//! `<key>.<compressed_extension>`. The compressed file is built under a temp
//! name, optionally decoded again and compared with the original, renamed
//! into place, and only then is the original deleted. When a compressed
//! file already exists for the key (a previous run), the new data is
//! appended to it as an extra zstd frame.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use rayon::prelude::*;

use crate::atomic;
use crate::pool::build_pool;
use crate::report::{FileFailure, RecompressReport};
use crate::{Config, Error, Result};

const COPY_BUFFER_BYTES: usize = 256 * 1024;

/// Partition files and leftover temp files found in the output tree.
#[derive(Debug, Default)]
struct TreeScan {
    partitions: Vec<PathBuf>,
    stale_temps: Vec<PathBuf>,
    failures: Vec<FileFailure>,
}

/// Sizes of one recompressed partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compressed {
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Recompress every partition file under `config.output_root`.
///
/// Per-file failures are recorded in the report and leave that file's
/// original in place. Only an unreadable output root is an error; a missing
/// one means there is nothing to do.
pub fn recompress_tree(config: &Config) -> Result<RecompressReport> {
    let root = &config.output_root;
    if !root.exists() {
        info!("Nothing to recompress: {} does not exist", root.display());
        return Ok(RecompressReport::default());
    }

    let scan = scan_tree(root, &config.output_extension)?;
    let mut report = RecompressReport {
        failures: scan.failures,
        ..RecompressReport::default()
    };

    for temp in scan.stale_temps {
        match fs::remove_file(&temp) {
            Ok(()) => {
                debug!("Removed stale temp file {}", temp.display());
                report.stale_temps_removed += 1;
            }
            Err(e) => warn!("Cannot remove stale temp file {}: {}", temp.display(), e),
        }
    }

    if !config.verify_roundtrip {
        warn!(
            "Round-trip verification is disabled: originals under {} will be deleted unchecked",
            root.display()
        );
    }
    info!(
        "Compressing {} output files with {} threads",
        scan.partitions.len(),
        config.recompress_workers.max(1)
    );
    let pool = build_pool(config.recompress_workers, "recompress")?;
    let outcomes: Vec<(PathBuf, Result<Compressed>)> = pool.install(|| {
        scan.partitions
            .into_par_iter()
            .with_max_len(1)
            .map(|path| {
                let outcome = compress_partition(&path, config);
                (path, outcome)
            })
            .collect()
    });

    for (path, outcome) in outcomes {
        match outcome {
            Ok(c) => {
                report.compressed += 1;
                if !config.verify_roundtrip {
                    report.unverified += 1;
                }
                report.bytes_before += c.bytes_before;
                report.bytes_after += c.bytes_after;
            }
            Err(e) => {
                error!("Error compressing file {}: {}", path.display(), e);
                report.failures.push(FileFailure::new(path, e));
            }
        }
    }

    info!(
        "Compressed {} files ({} failed)",
        report.compressed,
        report.failed()
    );
    Ok(report)
}

/// Replace one partition file with its compressed form.
pub fn compress_partition(path: &Path, config: &Config) -> Result<Compressed> {
    let target = compressed_target(path, config)?;
    let temp = atomic::temp_path(&target);

    let compressed = match write_compressed(path, &target, &temp, config) {
        Ok(c) => c,
        Err(e) => {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
    };

    atomic::rename_into_place(&temp, &target).map_err(|source| Error::Write {
        path: target.clone(),
        source,
    })?;
    fs::remove_file(path).map_err(|source| Error::Remove {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(
        "Compressed {} -> {} ({} -> {} bytes)",
        path.display(),
        target.display(),
        compressed.bytes_before,
        compressed.bytes_after
    );
    Ok(compressed)
}

/// `<dir>/<key>.<output_extension>` to `<dir>/<key>.<compressed_extension>`.
fn compressed_target(path: &Path, config: &Config) -> Result<PathBuf> {
    let suffix = format!(".{}", config.output_extension);
    let key = path
        .file_name()
        .and_then(|s| s.to_str())
        .and_then(|name| name.strip_suffix(suffix.as_str()))
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
    Ok(path.with_file_name(format!("{}.{}", key, config.compressed_extension)))
}

fn write_compressed(
    original: &Path,
    target: &Path,
    temp: &Path,
    config: &Config,
) -> Result<Compressed> {
    let write_err = |source: io::Error| Error::Write {
        path: temp.to_path_buf(),
        source,
    };

    let input = File::open(original).map_err(|source| Error::Open {
        path: original.to_path_buf(),
        source,
    })?;
    let mut output = File::create(temp).map_err(write_err)?;

    // Keep what a previous run already compressed for this key.
    let prior_bytes = if target.exists() {
        let mut existing = File::open(target).map_err(|source| Error::Open {
            path: target.to_path_buf(),
            source,
        })?;
        io::copy(&mut existing, &mut output).map_err(write_err)?
    } else {
        0
    };

    let mut reader = HashingReader::new(BufReader::with_capacity(COPY_BUFFER_BYTES, input));
    let mut encoder =
        zstd::stream::write::Encoder::new(output, config.compression_level).map_err(write_err)?;
    let mut buf = vec![0u8; COPY_BUFFER_BYTES];
    loop {
        let n = reader.read(&mut buf).map_err(|source| Error::Read {
            path: original.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        encoder.write_all(&buf[..n]).map_err(write_err)?;
    }
    let mut output = encoder.finish().map_err(write_err)?;
    output.flush().map_err(write_err)?;
    output.sync_all().map_err(write_err)?;
    let total_bytes = output.metadata().map_err(write_err)?.len();
    drop(output);

    let (bytes_before, hash) = reader.finish();
    if config.verify_roundtrip {
        verify_frame(temp, prior_bytes, bytes_before, &hash, original)?;
    }

    Ok(Compressed {
        bytes_before,
        bytes_after: total_bytes - prior_bytes,
    })
}

/// Decode the frame(s) starting at `offset` and compare with the original.
fn verify_frame(
    temp: &Path,
    offset: u64,
    expected_len: u64,
    expected_hash: &blake3::Hash,
    original: &Path,
) -> Result<()> {
    let verify_err = |reason: String| Error::Verify {
        path: original.to_path_buf(),
        reason,
    };

    let mut file = File::open(temp).map_err(|e| verify_err(e.to_string()))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| verify_err(e.to_string()))?;
    let mut decoder =
        zstd::stream::read::Decoder::new(file).map_err(|e| verify_err(e.to_string()))?;
    let mut hasher = blake3::Hasher::new();
    let decoded_len =
        io::copy(&mut decoder, &mut hasher).map_err(|e| verify_err(e.to_string()))?;

    if decoded_len != expected_len {
        return Err(verify_err(format!(
            "decoded {} bytes, expected {}",
            decoded_len, expected_len
        )));
    }
    if hasher.finalize() != *expected_hash {
        return Err(verify_err("content hash mismatch".to_string()));
    }
    Ok(())
}

/// Hashes and counts everything read through it.
struct HashingReader<R> {
    inner: R,
    hasher: blake3::Hasher,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, blake3::Hash) {
        (self.bytes, self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

fn scan_tree(root: &Path, output_extension: &str) -> Result<TreeScan> {
    let entries = fs::read_dir(root).map_err(|source| Error::Discovery {
        path: root.to_path_buf(),
        source,
    })?;
    let suffix = format!(".{}", output_extension);
    let mut scan = TreeScan::default();
    scan_dir(entries, &suffix, &mut scan);
    scan.partitions.sort();
    Ok(scan)
}

fn scan_dir(entries: fs::ReadDir, suffix: &str, scan: &mut TreeScan) {
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        let is_dir = match entry.file_type() {
            Ok(ft) => ft.is_dir(),
            Err(source) => {
                scan.failures.push(FileFailure::new(&path, Error::Io(source)));
                continue;
            }
        };

        if is_dir {
            match fs::read_dir(&path) {
                Ok(sub) => scan_dir(sub, suffix, scan),
                Err(source) => {
                    error!("Cannot read directory {}: {}", path.display(), source);
                    let failure = Error::Discovery {
                        path: path.clone(),
                        source,
                    };
                    scan.failures.push(FileFailure::new(path, failure));
                }
            }
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if atomic::is_temp_name(&name) {
            scan.stale_temps.push(path);
        } else if name.ends_with(suffix) {
            scan.partitions.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        let config = Config::new(tmp.path().join("in"), tmp.path().join("out"));
        (tmp, config)
    }

    fn put(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn decompress(path: &Path) -> Vec<u8> {
        zstd::stream::decode_all(File::open(path).unwrap()).unwrap()
    }

    #[test]
    fn test_round_trip_and_original_removed() {
        let (_tmp, config) = setup();
        let original = config.partition_path("2023-01", "AskReddit");
        let content = b"{\"subreddit\":\"AskReddit\"}\n{\"subreddit\":\"AskReddit!\"}\n";
        put(&original, content);

        let report = recompress_tree(&config).unwrap();
        assert_eq!(report.compressed, 1);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.bytes_before, content.len() as u64);
        assert_eq!(report.unverified, 0);

        let target = config.compressed_path("2023-01", "AskReddit");
        assert!(!original.exists());
        assert_eq!(decompress(&target), content);
    }

    #[test]
    fn test_unverified_files_are_counted() {
        let (_tmp, mut config) = setup();
        config.verify_roundtrip = false;
        put(&config.partition_path("2023-01", "a"), b"{}\n");
        put(&config.partition_path("2023-01", "b"), b"{}\n");

        let report = recompress_tree(&config).unwrap();
        assert_eq!(report.compressed, 2);
        assert_eq!(report.unverified, 2);
        assert_eq!(decompress(&config.compressed_path("2023-01", "a")), b"{}\n");
    }

    #[test]
    fn test_empty_key_partition() {
        let (_tmp, config) = setup();
        let original = config.partition_path("2023-01", "");
        put(&original, b"{}\n");

        recompress_tree(&config).unwrap();
        assert!(!original.exists());
        assert_eq!(decompress(&config.compressed_path("2023-01", "")), b"{}\n");
    }

    #[test]
    fn test_appends_to_existing_compressed_file() {
        let (_tmp, config) = setup();
        let original = config.partition_path("2023-01", "rust");

        put(&original, b"first\n");
        recompress_tree(&config).unwrap();
        put(&original, b"second\n");
        let report = recompress_tree(&config).unwrap();

        assert_eq!(report.compressed, 1);
        assert_eq!(
            decompress(&config.compressed_path("2023-01", "rust")),
            b"first\nsecond\n"
        );
    }

    #[test]
    fn test_failure_keeps_original_and_continues() {
        let (_tmp, config) = setup();
        let bad = config.partition_path("2023-01", "bad");
        let good = config.partition_path("2023-01", "good");
        put(&bad, b"bad\n");
        put(&good, b"good\n");
        // A directory where the compressed sibling should go.
        fs::create_dir_all(config.compressed_path("2023-01", "bad")).unwrap();

        let report = recompress_tree(&config).unwrap();
        assert_eq!(report.compressed, 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].path, bad);
        assert!(bad.exists(), "original must survive a failed compression");
        assert!(!good.exists());

        // No temp files left behind.
        let leftovers: Vec<_> = fs::read_dir(config.bucket_dir("2023-01"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| atomic::is_temp_name(&e.file_name().to_string_lossy()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_stale_temps_removed_and_compressed_files_ignored() {
        let (_tmp, config) = setup();
        put(&config.bucket_dir("2023-01").join(".tmp.0123456789abcdef.rust.zst"), b"partial");
        put(&config.compressed_path("2023-01", "go"), b"already compressed");

        let report = recompress_tree(&config).unwrap();
        assert_eq!(report.stale_temps_removed, 1);
        assert_eq!(report.compressed, 0);
        assert!(config.compressed_path("2023-01", "go").exists());
    }

    #[test]
    fn test_missing_output_root() {
        let (_tmp, config) = setup();
        let report = recompress_tree(&config).unwrap();
        assert_eq!(report.compressed, 0);
    }

    #[test]
    fn test_parallel_recompression() {
        let (_tmp, mut config) = setup();
        config.recompress_workers = 4;
        for bucket in ["2023-01", "2023-02"] {
            for key in ["a", "b", "c", "d"] {
                put(&config.partition_path(bucket, key), format!("{bucket}/{key}\n").as_bytes());
            }
        }

        let report = recompress_tree(&config).unwrap();
        assert_eq!(report.compressed, 8);
        assert_eq!(
            decompress(&config.compressed_path("2023-02", "c")),
            b"2023-02/c\n"
        );
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let (tmp, _config) = setup();
        let temp = tmp.path().join("frame.zst");
        let original = tmp.path().join("orig.jsonl");
        fs::write(&temp, zstd::stream::encode_all(&b"hello\n"[..], 3).unwrap()).unwrap();

        let right = blake3::hash(b"hello\n");
        assert!(verify_frame(&temp, 0, 6, &right, &original).is_ok());

        let wrong = blake3::hash(b"HELLO\n");
        assert!(matches!(
            verify_frame(&temp, 0, 6, &wrong, &original),
            Err(Error::Verify { .. })
        ));
        assert!(verify_frame(&temp, 0, 7, &right, &original).is_err());
    }

    #[test]
    fn test_compressed_target_requires_extension() {
        let (_tmp, config) = setup();
        assert!(compressed_target(Path::new("/out/2023-01/rust.txt"), &config).is_err());
        assert_eq!(
            compressed_target(Path::new("/out/2023-01/rust.jsonl"), &config).unwrap(),
            PathBuf::from("/out/2023-01/rust.zst")
        );
    }
}
