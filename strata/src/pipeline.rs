//! Full run: discover, ingest, recompress.

use chrono::Utc;
use log::{error, info};

use crate::allowlist::CategoryAllowlist;
use crate::pool::run_workers;
use crate::recompress::recompress_tree;
use crate::report::{FileFailure, IngestReport, RecompressReport, RunReport};
use crate::source::{discover_sources, SourceFile};
use crate::writer::PartitionWriter;
use crate::{Config, Result};

/// Entry point for library users.
pub struct Pipeline {
    config: Config,
    allowlist: Option<CategoryAllowlist>,
}

impl Pipeline {
    /// Validate the config, load the category allowlist if one is set,
    /// and build a pipeline.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let allowlist = match &config.category_allowlist {
            Some(path) => Some(CategoryAllowlist::load(path)?),
            None => None,
        };
        Ok(Self { config, allowlist })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn allowlist(&self) -> Option<&CategoryAllowlist> {
        self.allowlist.as_ref()
    }

    /// List the source files this pipeline would process.
    pub fn discover(&self) -> Result<Vec<SourceFile>> {
        discover_sources(&self.config)
    }

    /// Write phase only. Fails only if discovery fails.
    pub fn ingest(&self) -> Result<IngestReport> {
        let sources = self.discover()?;
        self.ingest_sources(&sources)
    }

    /// Write phase over an explicit list of sources.
    pub fn ingest_sources(&self, sources: &[SourceFile]) -> Result<IngestReport> {
        let writer = PartitionWriter::new(self.config.clone());
        let report = run_workers(sources, &writer, self.allowlist.as_ref())?;
        info!(
            "Write phase touched {} partitions under {}",
            writer.partitions_touched(),
            self.config.output_root.display()
        );
        Ok(report)
    }

    /// Recompression pass only.
    pub fn recompress(&self) -> Result<RecompressReport> {
        recompress_tree(&self.config)
    }

    /// Discover, ingest every source, then recompress the whole output tree.
    ///
    /// The recompression pass starts only after every file worker returned.
    /// Once ingestion has run, a recompression pass that cannot start is
    /// reported as a failure against the output root instead of an error.
    pub fn run(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let ingest = self.ingest()?;

        info!("Processing complete. Compressing output files...");
        let recompress = match self.recompress() {
            Ok(report) => report,
            Err(e) => {
                error!("Recompression pass failed: {}", e);
                RecompressReport {
                    failures: vec![FileFailure::new(&self.config.output_root, e)],
                    ..RecompressReport::default()
                }
            }
        };

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            ingest,
            recompress,
        })
    }
}
