//! Drives one source file from compressed bytes to partition files.
//!
//! States: `Opening -> Streaming -> (Flushing)* -> Finalizing -> Done`,
//! with `Failed` reachable from any of them. Everything here runs on the
//! calling thread; reading, decoding and writing never overlap.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::time::Instant;

use log::{debug, warn};

use crate::allowlist::CategoryAllowlist;
use crate::chunk::ChunkAccumulator;
use crate::progress::{CountingReader, FileProgress};
use crate::record::RecordSchema;
use crate::sanitize::sanitize;
use crate::source::SourceFile;
use crate::writer::PartitionWriter;
use crate::{Error, Result};

/// Read-side buffer in front of the decompressor.
const READ_BUFFER_BYTES: usize = 1024 * 1024;

/// Where a file worker currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Opening,
    Streaming,
    Flushing,
    Finalizing,
    Done,
    Failed,
}

/// Counters for one source file (or a whole run, once added up).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileStats {
    /// Lines read, blank ones included.
    pub lines: u64,
    /// Lines decoded into records.
    pub records: u64,
    /// Lines skipped because they did not decode.
    pub decode_errors: u64,
    /// Records dropped by the category allowlist.
    pub filtered: u64,
    /// Accumulator flushes, the final one included.
    pub flushes: u64,
    /// Records appended to partition files.
    pub records_written: u64,
}

impl FileStats {
    pub fn add(&mut self, other: &FileStats) {
        self.lines += other.lines;
        self.records += other.records;
        self.decode_errors += other.decode_errors;
        self.filtered += other.filtered;
        self.flushes += other.flushes;
        self.records_written += other.records_written;
    }
}

/// Failure of the bounded line reader.
#[derive(Debug)]
pub enum LineError {
    /// A line longer than the configured limit.
    TooLong { line: u64 },
    /// The underlying stream failed.
    Io(io::Error),
}

/// Forward-only line iterator with an upper bound on line length.
pub struct LineReader<R> {
    inner: R,
    max_line_bytes: usize,
    buf: Vec<u8>,
    line_no: u64,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner,
            max_line_bytes,
            buf: Vec::new(),
            line_no: 0,
        }
    }

    /// 1-based number of the line last returned.
    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// Next line without its terminator, or `None` at end of stream.
    pub fn next_line(&mut self) -> std::result::Result<Option<&[u8]>, LineError> {
        self.buf.clear();
        // Headroom for a maximal line's `\r\n` terminator.
        let limit = self.max_line_bytes as u64 + 2;
        let n = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .map_err(LineError::Io)?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        if self.buf.len() > self.max_line_bytes {
            return Err(LineError::TooLong { line: self.line_no });
        }
        Ok(Some(&self.buf))
    }
}

/// Processes exactly one source file.
pub struct FileWorker<'a> {
    source: &'a SourceFile,
    writer: &'a PartitionWriter,
    allowlist: Option<&'a CategoryAllowlist>,
    schema: RecordSchema,
    chunk: ChunkAccumulator,
    stats: FileStats,
    state: WorkerState,
}

impl<'a> FileWorker<'a> {
    pub fn new(source: &'a SourceFile, writer: &'a PartitionWriter) -> Self {
        let config = writer.config();
        Self {
            source,
            writer,
            allowlist: None,
            schema: RecordSchema::new(&config.category_field, &config.timestamp_field),
            chunk: ChunkAccumulator::new(config.chunk_rows),
            stats: FileStats::default(),
            state: WorkerState::Opening,
        }
    }

    /// Drop records whose category is not on `allowlist`.
    pub fn with_allowlist(mut self, allowlist: Option<&'a CategoryAllowlist>) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Counters so far. After a failure these still cover what was written.
    pub fn stats(&self) -> &FileStats {
        &self.stats
    }

    /// Open, decompress and route the whole file.
    pub fn run(&mut self) -> Result<FileStats> {
        let result = self.open_and_stream();
        self.finish(result)
    }

    /// Route an already-decompressed stream. Used when the caller owns
    /// the decompression (and by tests).
    pub fn run_stream<R: BufRead>(&mut self, reader: R) -> Result<FileStats> {
        let result = self.stream(reader, None);
        self.finish(result)
    }

    fn finish(&mut self, result: Result<()>) -> Result<FileStats> {
        match result {
            Ok(()) => {
                self.state = WorkerState::Done;
                debug!(
                    "{}: {} records into bucket {} ({} flushes)",
                    self.source.path.display(),
                    self.stats.records,
                    self.source.bucket,
                    self.stats.flushes
                );
                Ok(self.stats.clone())
            }
            Err(e) => {
                debug!("{}: failed while {:?}", self.source.path.display(), self.state);
                self.state = WorkerState::Failed;
                Err(e)
            }
        }
    }

    fn open_and_stream(&mut self) -> Result<()> {
        let source = self.source;
        let writer = self.writer;
        let path = &source.path;
        let config = writer.config();

        let file = File::open(path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        let total_bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
        let (counted, consumed) = CountingReader::new(file);

        let mut decoder = zstd::stream::read::Decoder::new(counted).map_err(|source| {
            Error::Decompress {
                path: path.clone(),
                source,
            }
        })?;
        decoder
            .window_log_max(config.max_window_log)
            .map_err(|source| Error::Decompress {
                path: path.clone(),
                source,
            })?;

        let progress = FileProgress::new(path.clone(), total_bytes, consumed);
        let reader = BufReader::with_capacity(READ_BUFFER_BYTES, decoder);
        self.stream(reader, Some(progress))
    }

    fn stream<R: BufRead>(&mut self, reader: R, mut progress: Option<FileProgress>) -> Result<()> {
        self.state = WorkerState::Streaming;
        let writer = self.writer;
        let allowlist = self.allowlist;
        let config = writer.config();
        let timeout = config.file_timeout();
        let check_every = config.timeout_check_interval.max(1);
        let started = Instant::now();
        let path = self.source.path.clone();

        let mut lines = LineReader::new(reader, config.max_line_bytes);
        let stream_error = loop {
            let line = match lines.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => break None,
                Err(LineError::TooLong { line }) => {
                    break Some(Error::LineTooLong {
                        path: path.clone(),
                        line,
                        limit: config.max_line_bytes,
                    })
                }
                Err(LineError::Io(source)) => {
                    break Some(Error::Read {
                        path: path.clone(),
                        source,
                    })
                }
            };
            self.stats.lines += 1;

            if !line.iter().all(u8::is_ascii_whitespace) {
                match self.schema.decode(line) {
                    Ok(record) => {
                        if allowlist.is_some_and(|list| !list.allows(&record.category)) {
                            self.stats.filtered += 1;
                        } else {
                            let key = sanitize(&record.category);
                            self.chunk.add(key, record);
                            self.stats.records += 1;
                            if let Some(p) = progress.as_mut() {
                                p.on_row();
                            }
                            if self.chunk.should_flush() {
                                self.flush()?;
                            }
                        }
                    }
                    Err(e) => {
                        self.stats.decode_errors += 1;
                        warn!(
                            "{}:{}: skipping line: {}",
                            path.display(),
                            lines.line_no(),
                            e
                        );
                    }
                }
            }

            if self.stats.lines % check_every == 0 {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    return Err(Error::Timeout {
                        path,
                        elapsed,
                        limit: timeout,
                    });
                }
            }
        };

        // Records decoded before a stream failure are still valid; keep them.
        self.state = WorkerState::Finalizing;
        if !self.chunk.is_empty() {
            self.flush()?;
        }
        if let Some(p) = progress.as_ref() {
            p.finish();
        }

        match stream_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        let resume = self.state;
        self.state = WorkerState::Flushing;
        debug!(
            "{}: flushing {} rows across {} keys",
            self.source.path.display(),
            self.chunk.len(),
            self.chunk.key_count()
        );
        for (key, records) in self.chunk.drain() {
            let written = self.writer.write(&self.source.bucket, &key, &records)?;
            self.stats.records_written += written as u64;
        }
        self.stats.flushes += 1;
        self.state = resume;
        Ok(())
    }
}
