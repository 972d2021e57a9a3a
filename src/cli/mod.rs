//! CLI module for vidingest
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

/// vidingest - resilient ingestion of untrusted video uploads
///
/// Validates, quarantines or stores incoming videos and drives the remote
/// analysis service to a result.
#[derive(Parser, Debug)]
#[command(name = "vidingest")]
#[command(about = "Validate, store and analyse untrusted video uploads")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "VIDINGEST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (overrides the configuration)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the storage layout under the base directory
    Init,
    /// Validate, store and analyse video files
    Process(args::ProcessArgs),
    /// Inspect and manage quarantined files
    Quarantine(args::QuarantineArgs),
    /// Estimate the bit rate of a video file
    Bitrate(args::BitrateArgs),
}
