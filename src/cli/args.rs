//! Command-line argument definitions

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use clap_num::number_range;

fn parse_jobs(s: &str) -> Result<usize, String> {
    number_range(s, 1, 256)
}

fn parse_age_days(s: &str) -> Result<u32, String> {
    number_range(s, 0, 36_500)
}

/// Output format for listings and results
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// Arguments for the process command
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Video files to ingest
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Uploads processed concurrently (default: number of CPUs)
    #[arg(short, long, value_parser = parse_jobs)]
    pub jobs: Option<usize>,

    /// Result output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Arguments for the quarantine command
#[derive(Args, Debug)]
pub struct QuarantineArgs {
    #[command(subcommand)]
    pub command: QuarantineCommand,
}

#[derive(Subcommand, Debug)]
pub enum QuarantineCommand {
    /// List quarantined files
    List {
        /// Include the sidecar record of each file
        #[arg(long)]
        metadata: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Delete quarantined files older than the given age
    Cleanup {
        #[arg(long, value_parser = parse_age_days, default_value = "30")]
        max_age_days: u32,
    },
    /// Move a quarantined file back out
    Restore {
        /// Quarantined file
        path: PathBuf,
        /// Where to put it
        destination: PathBuf,
    },
}

/// Arguments for the bitrate command
#[derive(Args, Debug)]
pub struct BitrateArgs {
    /// Video file to measure
    pub file: PathBuf,
}
