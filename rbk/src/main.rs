//! rbk: re-bucket compressed JSON line dumps by time bucket and category.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "rbk")]
#[command(about = "Re-bucket compressed JSON line dumps into per-category files")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand. Flags override the config file.
#[derive(Args)]
pub struct GlobalArgs {
    /// Config file (default: $REBUCKET_CONFIG, then the user config dir)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Source files processed concurrently
    #[arg(short = 'w', long = "workers", global = true)]
    workers: Option<usize>,

    /// Rows buffered per source file before writing
    #[arg(long = "chunk-rows", global = true)]
    chunk_rows: Option<usize>,

    /// Per-file soft deadline in seconds
    #[arg(long = "timeout-secs", global = true)]
    timeout_secs: Option<u64>,

    /// Prefix stripped from source names to get the time bucket
    #[arg(long = "prefix", global = true)]
    prefix: Option<String>,

    /// Only process source files whose name matches this glob
    #[arg(long = "pattern", global = true)]
    pattern: Option<String>,

    /// What to write per record: full (original line) or compact
    #[arg(long = "projection", global = true)]
    projection: Option<strata::Projection>,

    /// CSV of categories to keep (`name` column)
    #[arg(long = "allowlist", global = true)]
    allowlist: Option<PathBuf>,

    /// Threads used by the recompression pass
    #[arg(long = "recompress-workers", global = true)]
    recompress_workers: Option<usize>,

    /// Skip decoding compressed output before deleting the original
    #[arg(long = "no-verify", global = true)]
    no_verify: bool,

    /// Debug logging
    #[arg(short = 'v', long = "verbose", global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every source file, then recompress the output tree
    Run {
        /// Root of the compressed source tree
        input: Option<PathBuf>,

        /// Root of the output tree
        output: Option<PathBuf>,
    },

    /// Ingest only; leaves uncompressed partition files behind
    Ingest {
        /// Root of the compressed source tree
        input: Option<PathBuf>,

        /// Root of the output tree
        output: Option<PathBuf>,
    },

    /// Recompress an existing output tree (e.g. after an interrupted run)
    Recompress {
        /// Root of the output tree
        output: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Root of the compressed source tree
        input: Option<PathBuf>,

        /// Root of the output tree
        output: Option<PathBuf>,

        /// Write it to the config file instead of printing it
        #[arg(long)]
        init: bool,
    },
}

fn init_logging(global: &GlobalArgs) {
    let level = if global.verbose {
        "debug"
    } else if global.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.global);

    let result = match cli.command {
        Commands::Run { input, output } => commands::run(&cli.global, input, output),
        Commands::Ingest { input, output } => commands::ingest(&cli.global, input, output),
        Commands::Recompress { output } => commands::recompress(&cli.global, output),
        Commands::Config { input, output, init } => {
            commands::show_config(&cli.global, input, output, init)
        }
    };

    match result {
        Ok(commands::Outcome::Clean) => {}
        Ok(commands::Outcome::PartialFailure) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
