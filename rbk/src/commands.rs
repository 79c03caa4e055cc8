//! CLI command implementations.

use std::path::PathBuf;

use log::debug;
use strata::{Config, Error, IngestReport, Pipeline, RecompressReport};

use crate::GlobalArgs;

/// How a command ended when it did not hit a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    /// Some files failed; the rest were processed.
    PartialFailure,
}

impl Outcome {
    fn from_failures(count: usize) -> Self {
        if count == 0 {
            Outcome::Clean
        } else {
            Outcome::PartialFailure
        }
    }
}

/// Config file named by `--config`, else the default one, if present.
///
/// An explicit `--config` path must exist unless `allow_missing` is set,
/// which `config --init` uses to create it.
fn load_config_file(global: &GlobalArgs, allow_missing: bool) -> strata::Result<Option<Config>> {
    match &global.config {
        Some(path) if allow_missing => Config::load_optional(path),
        Some(path) => Config::load_from(path).map(Some),
        None => Config::load(),
    }
}

/// Build the effective config: defaults, then config file, then flags.
fn resolve_config(
    global: &GlobalArgs,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    allow_missing: bool,
) -> strata::Result<Config> {
    let from_file = load_config_file(global, allow_missing)?;

    let mut config = match (from_file, input, output) {
        (Some(mut config), input, output) => {
            if let Some(input) = input {
                config.input_root = input;
            }
            if let Some(output) = output {
                config.output_root = output;
            }
            config
        }
        (None, Some(input), Some(output)) => Config::new(input, output),
        (None, _, _) => {
            return Err(Error::Config(
                "input and output roots are required (pass them or set them in a config file)"
                    .to_string(),
            ))
        }
    };
    apply_flags(global, &mut config);
    Ok(config)
}

fn apply_flags(global: &GlobalArgs, config: &mut Config) {
    if let Some(workers) = global.workers {
        config.workers = workers;
    }
    if let Some(rows) = global.chunk_rows {
        config.chunk_rows = rows;
    }
    if let Some(secs) = global.timeout_secs {
        config.file_timeout_secs = secs;
    }
    if let Some(prefix) = &global.prefix {
        config.source_prefix = prefix.clone();
    }
    if let Some(pattern) = &global.pattern {
        config.source_pattern = Some(pattern.clone());
    }
    if let Some(projection) = global.projection {
        config.projection = projection;
    }
    if let Some(path) = &global.allowlist {
        config.category_allowlist = Some(path.clone());
    }
    if let Some(threads) = global.recompress_workers {
        config.recompress_workers = threads;
    }
    if global.no_verify {
        config.verify_roundtrip = false;
    }
    debug!("Effective config: {:?}", config);
}

pub fn run(
    global: &GlobalArgs,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> strata::Result<Outcome> {
    let pipeline = Pipeline::new(resolve_config(global, input, output, false)?)?;
    let report = pipeline.run()?;

    print_ingest(&report.ingest);
    print_recompress(&report.recompress);
    println!("Done in {}s", report.duration().num_seconds());

    Ok(Outcome::from_failures(
        report.ingest.failed() + report.recompress.failed(),
    ))
}

pub fn ingest(
    global: &GlobalArgs,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> strata::Result<Outcome> {
    let pipeline = Pipeline::new(resolve_config(global, input, output, false)?)?;
    let report = pipeline.ingest()?;
    print_ingest(&report);
    Ok(Outcome::from_failures(report.failed()))
}

pub fn recompress(global: &GlobalArgs, output: Option<PathBuf>) -> strata::Result<Outcome> {
    // Input root is unused by this pass.
    let mut config = match (load_config_file(global, false)?, output) {
        (Some(mut config), output) => {
            if let Some(output) = output {
                config.output_root = output;
            }
            config
        }
        (None, Some(output)) => Config::new(PathBuf::new(), output),
        (None, None) => {
            return Err(Error::Config(
                "output root is required (pass it or set it in a config file)".to_string(),
            ))
        }
    };
    apply_flags(global, &mut config);

    let pipeline = Pipeline::new(config)?;
    let report = pipeline.recompress()?;
    print_recompress(&report);
    Ok(Outcome::from_failures(report.failed()))
}

pub fn show_config(
    global: &GlobalArgs,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    init: bool,
) -> strata::Result<Outcome> {
    let config = resolve_config(global, input, output, init)?;
    config.validate()?;

    if init {
        let path = match &global.config {
            Some(path) => path.clone(),
            None => strata::default_config_path()?,
        };
        config.save(&path)?;
        println!("Wrote {}", path.display());
    } else {
        print!("{}", config.to_toml()?);
    }
    Ok(Outcome::Clean)
}

fn print_ingest(report: &IngestReport) {
    println!(
        "Ingested {} of {} source files: {} records written, {} lines skipped",
        report.succeeded,
        report.files,
        report.stats.records_written,
        report.stats.decode_errors
    );
    if report.stats.filtered > 0 {
        println!("  {} records outside the category allowlist", report.stats.filtered);
    }
    if !report.failures.is_empty() {
        println!("Failed source files ({}):", report.failures.len());
        for failure in &report.failures {
            println!("  {}", failure);
        }
    }
}

fn print_recompress(report: &RecompressReport) {
    println!(
        "Compressed {} files: {} -> {} ({})",
        report.compressed,
        format_bytes(report.bytes_before),
        format_bytes(report.bytes_after),
        format_reduction(report.bytes_before, report.bytes_after)
    );
    if report.unverified > 0 {
        println!(
            "  Warning: {} originals deleted without round-trip verification",
            report.unverified
        );
    }
    if report.stale_temps_removed > 0 {
        println!("  Removed {} stale temp files", report.stale_temps_removed);
    }
    if !report.failures.is_empty() {
        println!("Failed output files ({}):", report.failures.len());
        for failure in &report.failures {
            println!("  {}", failure);
        }
    }
}

/// Format bytes as human-readable size.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format size change as percentage.
fn format_reduction(before: u64, after: u64) -> String {
    if before == 0 {
        return "0%".to_string();
    }
    if after >= before {
        let increase = ((after - before) as f64 / before as f64) * 100.0;
        format!("+{:.1}%", increase)
    } else {
        let reduction = ((before - after) as f64 / before as f64) * 100.0;
        format!("-{:.1}%", reduction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_format_reduction() {
        assert_eq!(format_reduction(0, 10), "0%");
        assert_eq!(format_reduction(100, 25), "-75.0%");
        assert_eq!(format_reduction(100, 150), "+50.0%");
    }

    #[test]
    fn test_outcome_from_failures() {
        assert_eq!(Outcome::from_failures(0), Outcome::Clean);
        assert_eq!(Outcome::from_failures(3), Outcome::PartialFailure);
    }
}
