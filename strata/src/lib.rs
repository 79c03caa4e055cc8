//! strata: re-bucket compressed JSON line dumps.
//!
//! Records from each `RS_<bucket>.zst` source land in
//! `<output_root>/<bucket>/<category>.jsonl`, which a final pass recompresses
//! to `<category>.zst`.

pub mod allowlist;
pub mod atomic;
pub mod chunk;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod recompress;
pub mod record;
pub mod report;
pub mod sanitize;
pub mod source;
pub mod worker;
pub mod writer;

pub use allowlist::CategoryAllowlist;
pub use chunk::ChunkAccumulator;
pub use config::{default_config_path, Config, CONFIG_ENV_VAR};
pub use error::{DecodeError, Error, Result};
pub use pipeline::Pipeline;
pub use pool::run_workers;
pub use recompress::{compress_partition, recompress_tree};
pub use record::{Projection, Record, RecordSchema};
pub use report::{FileFailure, IngestReport, RecompressReport, RunReport};
pub use sanitize::{sanitize, MAX_KEY_LEN};
pub use source::{discover_sources, time_bucket, SourceFile};
pub use worker::{FileStats, FileWorker, WorkerState};
pub use writer::{PartitionKey, PartitionWriter};
