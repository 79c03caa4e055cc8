//! Bounded concurrent execution of file workers.
//!
//! Each pool thread is one token: a worker holds it from start to return,
//! so at most `workers` files are open at once. A failing or panicking
//! worker only loses its own file.

use std::panic::{self, AssertUnwindSafe};

use log::{error, info};
use rayon::prelude::*;

use crate::allowlist::CategoryAllowlist;
use crate::report::{FileFailure, IngestReport};
use crate::source::SourceFile;
use crate::worker::{FileStats, FileWorker};
use crate::writer::PartitionWriter;
use crate::{Error, Result};

/// Build a dedicated rayon pool with exactly `threads` threads.
pub(crate) fn build_pool(threads: usize, name: &'static str) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(move |i| format!("{}-{}", name, i))
        .build()
        .map_err(|e| Error::ThreadPool(format!("Failed to start {} pool: {}", name, e)))
}

/// Run one worker per source file, `writer.config().workers` at a time.
///
/// Returns after every worker has finished. Never fails because of a
/// single file; only a pool that cannot be started is an error.
pub fn run_workers(
    sources: &[SourceFile],
    writer: &PartitionWriter,
    allowlist: Option<&CategoryAllowlist>,
) -> Result<IngestReport> {
    let workers = writer.config().workers;
    let pool = build_pool(workers, "ingest")?;
    info!(
        "Processing {} source files with {} workers",
        sources.len(),
        workers.max(1)
    );

    let outcomes: Vec<(&SourceFile, FileStats, Result<()>)> = pool.install(|| {
        sources
            .par_iter()
            .with_max_len(1)
            .map(|source| {
                let (stats, result) = run_isolated(source, writer, allowlist);
                (source, stats, result)
            })
            .collect()
    });

    let mut report = IngestReport {
        files: sources.len(),
        ..IngestReport::default()
    };
    for (source, stats, outcome) in outcomes {
        report.stats.add(&stats);
        match outcome {
            Ok(()) => report.succeeded += 1,
            Err(e) => {
                error!("Error processing file {}: {}", source.path.display(), e);
                report.failures.push(FileFailure::new(&source.path, e));
            }
        }
    }

    info!(
        "Processed {} of {} source files ({} failed), {} records written",
        report.succeeded,
        report.files,
        report.failed(),
        report.stats.records_written
    );
    Ok(report)
}

/// Run one worker, turning a panic into an error for that file.
///
/// The stats cover what the worker got done even when it failed.
fn run_isolated(
    source: &SourceFile,
    writer: &PartitionWriter,
    allowlist: Option<&CategoryAllowlist>,
) -> (FileStats, Result<()>) {
    info!("Processing file {}", source.path.display());
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut worker = FileWorker::new(source, writer).with_allowlist(allowlist);
        let result = worker.run().map(|_| ());
        (worker.stats().clone(), result)
    }));
    match outcome {
        Ok(outcome) => outcome,
        Err(payload) => (
            FileStats::default(),
            Err(Error::WorkerPanicked {
                path: source.path.clone(),
                message: panic_message(payload.as_ref()),
            }),
        ),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
