//! Error types for rebucket operations.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot list source files under {path}: {source}")]
    Discovery {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot start decompression of {path}: {source}")]
    Decompress {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Line {line} of {path} exceeds the {limit} byte line limit")]
    LineTooLong {
        path: PathBuf,
        line: u64,
        limit: usize,
    },

    #[error("Error reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Error writing {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Timed out processing {path} after {elapsed:?} (limit {limit:?})")]
    Timeout {
        path: PathBuf,
        elapsed: Duration,
        limit: Duration,
    },

    #[error("Verification failed for {path}: {reason}")]
    Verify { path: PathBuf, reason: String },

    #[error("Worker for {path} panicked: {message}")]
    WorkerPanicked { path: PathBuf, message: String },

    #[error("Cannot read category allowlist {path}: {source}")]
    Allowlist {
        path: PathBuf,
        source: csv::Error,
    },

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a single line could not be turned into a record.
///
/// Never fatal: the line is skipped and the stream continues.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}
