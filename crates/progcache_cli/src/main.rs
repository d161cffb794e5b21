//! progcache CLI: offline tooling for persisted program cache blobs.
//!
//! Provides `progcache inspect` to summarize a blob, `progcache merge` to
//! combine several blobs into one, and `progcache verify` to check blobs
//! against the configured device.

#![warn(missing_docs)]

mod context;
mod inspect;
mod merge;
mod verify;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// progcache: inspect, merge, and verify program cache blobs.
#[derive(Parser, Debug)]
#[command(name = "progcache", version, about = "Program cache blob tooling")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a `progcache.toml` file or the directory containing it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the header and entries of a blob.
    Inspect(InspectArgs),
    /// Merge blobs into a single blob.
    Merge(MergeArgs),
    /// Check that blobs load cleanly on the configured device.
    Verify(VerifyArgs),
}

/// Arguments for `progcache inspect`.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Blob file to inspect.
    pub blob: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for `progcache merge`.
#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Blob files to merge. Earlier files win on duplicate keys.
    #[arg(required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Where to write the merged blob.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Take the device identity from the first input instead of the config.
    #[arg(long)]
    pub adopt_identity: bool,
}

/// Arguments for `progcache verify`.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Blob files to verify.
    #[arg(required = true, num_args = 1..)]
    pub blobs: Vec<PathBuf>,

    /// Take the device identity from each blob, checking structure only.
    #[arg(long)]
    pub adopt_identity: bool,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a config file or directory.
    pub config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    context::init_logging(&global);

    let result = match cli.command {
        Command::Inspect(ref args) => inspect::run(args, &global),
        Command::Merge(ref args) => merge::run(args, &global),
        Command::Verify(ref args) => verify::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
