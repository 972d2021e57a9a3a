//! vidingest CLI
//!
//! Ingests untrusted video files: each upload is validated, either
//! quarantined or stored, and then analysed by the remote task service.
//!
//! # Usage
//!
//! ```bash
//! vidingest init
//! vidingest process upload1.mp4 upload2.mov --jobs 4
//! vidingest quarantine list --metadata --format json
//! vidingest quarantine cleanup --max-age-days 30
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use vidingest::adapters::EnvCredentials;
use vidingest::cli::{commands, Cli, Commands};
use vidingest::config::{Settings, ENV_PREFIX};
use vidingest::utils::logging::{init_logging, log_system_info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    if cli.json_logs {
        settings.logging.json = true;
    }

    init_logging(&settings.logging);
    log_system_info();

    match cli.command {
        Commands::Init => {
            info!("Executing init command");
            commands::init(&settings)?;
        }
        Commands::Process(args) => {
            info!("Executing process command");
            let credentials = EnvCredentials::new(ENV_PREFIX);
            commands::process(&settings, &credentials, args).await?;
        }
        Commands::Quarantine(args) => {
            info!("Executing quarantine command");
            commands::quarantine(&settings, args)?;
        }
        Commands::Bitrate(args) => {
            info!("Executing bitrate command");
            commands::bitrate(&settings, args)?;
        }
    }

    Ok(())
}
