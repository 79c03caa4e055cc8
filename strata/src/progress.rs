//! Per-file progress lines.
//!
//! Purely informational: nothing in the pipeline reads these values back.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;

/// Minimum time between two progress lines for one file.
const LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Counts bytes pulled through a reader.
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> (Self, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        let reader = Self {
            inner,
            count: Arc::clone(&count),
        };
        (reader, count)
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Tracks rows and compressed bytes consumed for one source file.
pub struct FileProgress {
    path: PathBuf,
    total_bytes: u64,
    consumed: Arc<AtomicU64>,
    rows: u64,
    started: Instant,
    last_log: Instant,
}

impl FileProgress {
    pub fn new(path: PathBuf, total_bytes: u64, consumed: Arc<AtomicU64>) -> Self {
        let now = Instant::now();
        Self {
            path,
            total_bytes,
            consumed,
            rows: 0,
            started: now,
            last_log: now,
        }
    }

    /// Count one row, logging at most once per interval.
    pub fn on_row(&mut self) {
        self.rows += 1;
        if self.last_log.elapsed() >= LOG_INTERVAL {
            info!("{}", self.line());
            self.last_log = Instant::now();
        }
    }

    /// Log the final line for this file.
    pub fn finish(&self) {
        info!("{} (done)", self.line());
    }

    /// Fraction of the compressed input consumed so far, 0.0 to 1.0.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.consumed.load(Ordering::Relaxed) as f64 / self.total_bytes as f64).min(1.0)
    }

    fn line(&self) -> String {
        let elapsed = self.started.elapsed();
        let fraction = self.fraction();
        let remaining = if fraction > 0.0 {
            elapsed.mul_f64(1.0 / fraction).saturating_sub(elapsed)
        } else {
            Duration::ZERO
        };
        let per_row = if self.rows > 0 {
            elapsed.div_f64(self.rows as f64)
        } else {
            Duration::ZERO
        };
        format!(
            "{}: {} rows - {:.2}% - elapsed: {} - remaining: {} - {}/row",
            self.path.display(),
            self.rows,
            fraction * 100.0,
            format_duration(elapsed),
            format_duration(remaining),
            format_duration(per_row),
        )
    }
}

/// Short human form: sub-second values keep their unit, longer ones are HH:MM:SS.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    if d < Duration::from_micros(1) {
        return format!("{}ns", d.as_nanos());
    }
    if d < Duration::from_millis(1) {
        return format!("{:.2}µs", d.as_nanos() as f64 / 1_000.0);
    }
    if d < Duration::from_secs(1) {
        return format!("{:.2}ms", d.as_micros() as f64 / 1_000.0);
    }
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
