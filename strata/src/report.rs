//! Per-phase summaries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::worker::FileStats;
use crate::Error;

/// A file that could not be processed, and why.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: Error,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, error: Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

/// Outcome of the write phase.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Source files handed to the pool.
    pub files: usize,
    /// Source files that reached `Done`.
    pub succeeded: usize,
    pub failures: Vec<FileFailure>,
    /// Counters summed over every file, including what a failed file
    /// wrote before it stopped.
    pub stats: FileStats,
}

impl IngestReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Outcome of the recompression pass.
#[derive(Debug, Default)]
pub struct RecompressReport {
    /// Partition files replaced by their compressed form.
    pub compressed: usize,
    /// Leftover temp files from an interrupted pass that were removed.
    pub stale_temps_removed: usize,
    /// Uncompressed bytes read.
    pub bytes_before: u64,
    /// Compressed bytes written.
    pub bytes_after: u64,
    /// Files whose original was deleted without a round-trip check.
    pub unverified: usize,
    pub failures: Vec<FileFailure>,
}

impl RecompressReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Both phases of a full run.
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ingest: IngestReport,
    pub recompress: RecompressReport,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.ingest.failures.is_empty() || !self.recompress.failures.is_empty()
    }

    pub fn duration(&self) -> chrono::TimeDelta {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_report_has_failures() {
        let now = Utc::now();
        let mut report = RunReport {
            started_at: now,
            finished_at: now,
            ingest: IngestReport::default(),
            recompress: RecompressReport::default(),
        };
        assert!(!report.has_failures());
        assert_eq!(report.duration().num_seconds(), 0);

        report
            .recompress
            .failures
            .push(FileFailure::new("a.jsonl", Error::Config("x".into())));
        assert!(report.has_failures());
        assert_eq!(report.recompress.failed(), 1);
    }

    #[test]
    fn test_failure_display_names_path() {
        let failure = FileFailure::new(
            "/dumps/RS_2023-01.zst",
            Error::InvalidPath("bad".to_string()),
        );
        assert_eq!(failure.to_string(), "/dumps/RS_2023-01.zst: Invalid path: bad");
    }
}
