//! Append-only partition files.
//!
//! Layout: `<output_root>/<bucket>/<key>.<output_extension>`. Files are only
//! ever opened in append mode. Appends to the same (bucket, key) pair are
//! serialized through a per-partition lock so batches from concurrent
//! workers never interleave.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::record::{Projection, Record, RecordSchema};
use crate::{Config, Error, Result};

/// Buffer size for partition appends.
const WRITE_BUFFER_BYTES: usize = 1024 * 1024;

/// Address of one output partition file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub bucket: String,
    pub key: String,
}

impl PartitionKey {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Shared by every file worker of a run.
pub struct PartitionWriter {
    config: Config,
    schema: RecordSchema,
    locks: DashMap<PartitionKey, Arc<Mutex<()>>>,
}

impl PartitionWriter {
    pub fn new(config: Config) -> Self {
        let schema = RecordSchema::new(&config.category_field, &config.timestamp_field);
        Self {
            config,
            schema,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create the bucket directory if it does not exist yet.
    ///
    /// Safe to call any number of times, from any number of threads.
    pub fn ensure_bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        let dir = self.config.bucket_dir(bucket);
        create_dir_all_mode(&dir).map_err(|source| Error::Write {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Append `records` to the partition file of (bucket, key).
    ///
    /// The file is created on first use, flushed and closed before
    /// returning. Returns the number of records written.
    pub fn write(&self, bucket: &str, key: &str, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.ensure_bucket_dir(bucket)?;

        let path = self.config.partition_path(bucket, key);
        let lock = self.lock_for(bucket, key);
        // The guarded value is (), so a poisoned lock carries no broken state.
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        append_records(&path, &self.schema, self.config.projection, records).map_err(
            |source| Error::Write {
                path: path.clone(),
                source,
            },
        )?;
        Ok(records.len())
    }

    fn lock_for(&self, bucket: &str, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(PartitionKey::new(bucket, key))
            .or_default()
            .clone()
    }

    /// Number of distinct partitions written so far.
    pub fn partitions_touched(&self) -> usize {
        self.locks.len()
    }
}

fn append_records(
    path: &Path,
    schema: &RecordSchema,
    projection: Projection,
    records: &[Record],
) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
    for record in records {
        schema.encode(record, projection, &mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// `create_dir_all` with 0755 on unix.
fn create_dir_all_mode(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir)
}
