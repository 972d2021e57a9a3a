//! Command implementations

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::adapters::EnvCredentials;
use crate::cli::args::{BitrateArgs, OutputFormat, ProcessArgs, QuarantineArgs, QuarantineCommand};
use crate::config::Settings;
use crate::domain::errors::IngestResult;
use crate::domain::model::{ProcessingStatus, Video};
use crate::engine::{LoggingProgressCallback, ProgressCallback, UploadProcessor};
use crate::ports::VideoSourceFactory;
use crate::remote::TokioSleeper;
use crate::storage::{DirectoryManager, QuarantineManager};
use crate::utils::{format_bitrate, format_file_size};
use crate::validation::IntegrityChecker;

/// Execute the init command
pub fn init(settings: &Settings) -> Result<()> {
    let directories = DirectoryManager::new(&settings.storage);
    let created = directories
        .initialize()
        .context("Failed to create storage layout")?;
    for path in created {
        println!("{}", path.display());
    }
    info!("Storage layout ready under {}", directories.base_dir().display());
    Ok(())
}

/// Execute the process command
pub async fn process(
    settings: &Settings,
    credentials: &EnvCredentials,
    args: ProcessArgs,
) -> Result<()> {
    let processor = UploadProcessor::from_settings(
        settings,
        credentials,
        video_sources(settings)?,
        Arc::new(TokioSleeper),
    )
    .with_context(|| {
        format!(
            "Failed to set up the pipeline (is {} set?)",
            credentials.variable_name(&settings.remote.service_name)
        )
    })?;
    processor
        .directories()
        .initialize()
        .context("Failed to create storage layout")?;

    let jobs = args.jobs.unwrap_or_else(num_cpus::get);
    info!("Processing {} file(s) with {} job(s)", args.files.len(), jobs);
    let processor = Arc::new(processor);
    let callbacks: Vec<Arc<dyn ProgressCallback>> = vec![Arc::new(LoggingProgressCallback)];
    let results = processor.process_many(args.files, jobs, &callbacks).await;
    processor.client().close();

    let failures = results.iter().filter(|(_, r)| r.is_err()).count();
    print_results(&results, args.format)?;

    if failures > 0 {
        anyhow::bail!("{} of {} upload(s) failed", failures, results.len());
    }
    Ok(())
}

/// Execute the quarantine command
pub fn quarantine(settings: &Settings, args: QuarantineArgs) -> Result<()> {
    let directories = DirectoryManager::new(&settings.storage);
    let manager = QuarantineManager::new(directories, &settings.storage);

    match args.command {
        QuarantineCommand::List { metadata, format } => {
            let entries = manager
                .list_quarantined_files(metadata)
                .context("Failed to list quarantine")?;
            match format {
                OutputFormat::Text => {
                    for entry in &entries {
                        match &entry.metadata {
                            Some(record) => println!(
                                "{}\t{}\t{}",
                                entry.path.display(),
                                record.quarantine_time.to_rfc3339(),
                                record.reason
                            ),
                            None => println!("{}", entry.path.display()),
                        }
                    }
                }
                other => print_structured(&entries, other)?,
            }
        }
        QuarantineCommand::Cleanup { max_age_days } => {
            let removed = manager
                .cleanup_quarantine(max_age_days)
                .context("Failed to clean up quarantine")?;
            println!("Removed {} file(s) older than {} day(s)", removed, max_age_days);
        }
        QuarantineCommand::Restore { path, destination } => {
            let restored = manager
                .restore_file(&path, &destination)
                .with_context(|| format!("Failed to restore {}", path.display()))?;
            println!("{}", restored.display());
        }
    }
    Ok(())
}

/// Execute the bitrate command
pub fn bitrate(settings: &Settings, args: BitrateArgs) -> Result<()> {
    let checker = IntegrityChecker::new(
        video_sources(settings)?,
        &settings.validation,
        settings.storage.test_mode,
    );
    let bits_per_second = checker
        .estimate_bitrate(&args.file)
        .with_context(|| format!("Failed to measure {}", args.file.display()))?;
    let size = std::fs::metadata(&args.file)
        .map(|m| m.len())
        .unwrap_or_default();

    println!(
        "{}: {} ({})",
        args.file.display(),
        format_bitrate(bits_per_second),
        format_file_size(size)
    );
    Ok(())
}

/// Decoder used for metadata extraction
#[cfg(feature = "ffmpeg")]
fn video_sources(_settings: &Settings) -> Result<Arc<dyn VideoSourceFactory>> {
    Ok(Arc::new(crate::adapters::LibavVideoSourceFactory::new()))
}

#[cfg(not(feature = "ffmpeg"))]
fn video_sources(settings: &Settings) -> Result<Arc<dyn VideoSourceFactory>> {
    if settings.storage.test_mode {
        return Ok(Arc::new(crate::adapters::StubVideoSourceFactory::default()));
    }
    anyhow::bail!("vidingest was built without the `ffmpeg` feature; video decoding is unavailable")
}

#[derive(Serialize)]
struct ProcessReport<'a> {
    path: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<&'a Video>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn print_results(results: &[(std::path::PathBuf, IngestResult<Video>)], format: OutputFormat) -> Result<()> {
    if format != OutputFormat::Text {
        let reports: Vec<ProcessReport<'_>> = results
            .iter()
            .map(|(path, result)| ProcessReport {
                path,
                video: result.as_ref().ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            })
            .collect();
        return print_structured(&reports, format);
    }

    for (path, result) in results {
        match result {
            Ok(video) if video.status == ProcessingStatus::Quarantined => {
                warn!("{} quarantined", path.display());
                println!(
                    "{}: quarantined ({})",
                    path.display(),
                    video.error.as_deref().unwrap_or("no reason recorded")
                );
            }
            Ok(video) => println!(
                "{}: {} (video {}, remote {})",
                path.display(),
                video.status,
                video.id,
                video.remote_video_id.as_deref().unwrap_or("-")
            ),
            Err(e) => println!("{}: failed ({})", path.display(), e),
        }
    }
    Ok(())
}

fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let text = match format {
        OutputFormat::Yaml => serde_yaml::to_string(value).context("Failed to serialize YAML")?,
        _ => serde_json::to_string_pretty(value).context("Failed to serialize JSON")?,
    };
    println!("{}", text);
    Ok(())
}
