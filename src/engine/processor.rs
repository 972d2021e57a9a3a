//! Upload orchestration: file on disk to analysis result or quarantine
//!
//! Status flow per video:
//! `Pending -> Validating -> Uploading -> Processing -> Completed | Failed | Quarantined`

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ProcessingSettings, Settings};
use crate::domain::errors::{IngestError, IngestResult};
use crate::domain::model::{FileReference, ProcessingStatus, Video, VideoMetadata};
use crate::engine::context::UploadContext;
use crate::engine::progress::{ProgressCallback, ProgressTracker};
use crate::ports::{CredentialsProvider, Sleeper, VideoSourceFactory};
use crate::remote::RemoteTaskClient;
use crate::storage::directory::{PROCESSED_DIR, PROCESSING_DIR};
use crate::storage::{DirectoryManager, QuarantineManager};
use crate::validation::{FileValidator, IntegrityChecker, SecurityValidator};

/// Drives one upload at a time through validation, storage and remote analysis.
///
/// Independent uploads may run concurrently on a shared processor; each
/// works on paths derived from its own video id.
pub struct UploadProcessor {
    directories: Arc<DirectoryManager>,
    file_validator: Arc<FileValidator>,
    security: Arc<SecurityValidator>,
    integrity: Arc<IntegrityChecker>,
    quarantine: Arc<QuarantineManager>,
    client: Arc<RemoteTaskClient>,
    processing: ProcessingSettings,
    temp_root: PathBuf,
}

impl UploadProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directories: DirectoryManager,
        file_validator: FileValidator,
        security: SecurityValidator,
        integrity: IntegrityChecker,
        quarantine: QuarantineManager,
        client: RemoteTaskClient,
        processing: ProcessingSettings,
        temp_root: PathBuf,
    ) -> Self {
        Self {
            directories: Arc::new(directories),
            file_validator: Arc::new(file_validator),
            security: Arc::new(security),
            integrity: Arc::new(integrity),
            quarantine: Arc::new(quarantine),
            client: Arc::new(client),
            processing,
            temp_root,
        }
    }

    /// Wire every component from configuration
    pub fn from_settings(
        settings: &Settings,
        credentials: &dyn CredentialsProvider,
        sources: Arc<dyn VideoSourceFactory>,
        sleeper: Arc<dyn Sleeper>,
    ) -> IngestResult<Self> {
        let directories = DirectoryManager::new(&settings.storage);
        let security = SecurityValidator::new(directories.base_dir(), &settings.storage);
        let integrity =
            IntegrityChecker::new(sources, &settings.validation, settings.storage.test_mode);
        let quarantine = QuarantineManager::new(directories.clone(), &settings.storage);
        let client = RemoteTaskClient::new(&settings.remote, credentials, sleeper)?;
        let temp_root = settings.temp_dir();

        Ok(Self::new(
            directories,
            FileValidator::new(&settings.validation),
            security,
            integrity,
            quarantine,
            client,
            settings.processing.clone(),
            temp_root,
        ))
    }

    pub fn directories(&self) -> &DirectoryManager {
        &self.directories
    }

    pub fn quarantine(&self) -> &QuarantineManager {
        &self.quarantine
    }

    pub fn client(&self) -> &RemoteTaskClient {
        &self.client
    }

    /// Process one file with a fresh tracker
    pub async fn process_upload(&self, path: &Path, video_id: Option<String>) -> IngestResult<Video> {
        let id = video_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let tracker = ProgressTracker::new(&id);
        self.process_upload_with_tracker(path, id, tracker).await
    }

    /// Process one file, reporting to `tracker`.
    ///
    /// Validation failures end in `Quarantined` and return `Ok`; any other
    /// failure marks the stage on the tracker and is returned after cleanup.
    pub async fn process_upload_with_tracker(
        &self,
        path: &Path,
        video_id: String,
        tracker: ProgressTracker,
    ) -> IngestResult<Video> {
        let file = FileReference::from_path(path).unwrap_or_else(|_| FileReference {
            path: path.to_path_buf(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            format: crate::utils::path::extension_of(path).unwrap_or_default(),
            size: 0,
        });
        let mut video = Video::new(video_id, file);
        let mut ctx = UploadContext::new(&video.id, &self.temp_root, Some(tracker.clone()));

        info!(video_id = %video.id, path = %path.display(), "Processing upload");
        match self.run(&mut video, &mut ctx, &tracker).await {
            Ok(()) => ctx.exit(Ok(video)),
            Err(err) => {
                error!(video_id = %video.id, stage = %ctx.stage(), "Upload failed: {}", err);
                video.error = Some(err.to_string());
                video.status = ProcessingStatus::Failed;
                ctx.exit(Err(err))
            }
        }
    }

    /// Process `paths` concurrently, at most `jobs` at a time, in input order.
    /// Every upload's tracker reports to `callbacks`.
    pub async fn process_many(
        self: &Arc<Self>,
        paths: Vec<PathBuf>,
        jobs: usize,
        callbacks: &[Arc<dyn ProgressCallback>],
    ) -> Vec<(PathBuf, IngestResult<Video>)> {
        let permits = Arc::new(Semaphore::new(jobs.max(1)));
        let mut tasks = JoinSet::new();

        for (index, path) in paths.iter().cloned().enumerate() {
            let processor = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let callbacks = callbacks.to_vec();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let id = Uuid::new_v4().to_string();
                let tracker = ProgressTracker::new(&id);
                for callback in callbacks {
                    tracker.add_callback(callback);
                }
                let result = processor
                    .process_upload_with_tracker(&path, id, tracker)
                    .await;
                (index, path, result)
            });
        }

        let mut results: Vec<Option<(PathBuf, IngestResult<Video>)>> =
            paths.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, path, result)) => results[index] = Some((path, result)),
                Err(e) => error!("Upload task panicked or was cancelled: {}", e),
            }
        }

        results
            .into_iter()
            .zip(paths)
            .map(|(slot, path)| {
                slot.unwrap_or_else(|| {
                    let err = IngestError::InvalidState("Upload task did not finish".to_string());
                    (path, Err(err))
                })
            })
            .collect()
    }

    async fn run(
        &self,
        video: &mut Video,
        ctx: &mut UploadContext,
        tracker: &ProgressTracker,
    ) -> IngestResult<()> {
        // Validating
        video.transition(ProcessingStatus::Validating)?;
        ctx.set_stage(ProcessingStatus::Validating);
        tracker.update_progress(ProcessingStatus::Validating, 0.0, HashMap::new());

        let metadata = match self.validate(&video.file.path, tracker).await {
            Ok(metadata) => metadata,
            Err(err)
                if err.is_quarantinable() && QuarantineManager::can_quarantine(&video.file.path) =>
            {
                return self.quarantine_video(video, &err, tracker).await;
            }
            Err(err) => return Err(err),
        };
        video.metadata = Some(metadata);
        tracker.update_progress(ProcessingStatus::Validating, 100.0, HashMap::new());

        // Permanent storage
        let stored_name = format!("{}.{}", video.id, video.file.format);
        let directories = Arc::clone(&self.directories);
        let source = video.file.path.clone();
        let stored = blocking(move || {
            directories.move_file(&source, PROCESSING_DIR, Some(&stored_name))
        })
        .await?;
        // Test mode computes destinations without touching the filesystem
        if !self.directories.is_test_mode() {
            video.file.path = stored;
        }

        // Uploading
        video.transition(ProcessingStatus::Uploading)?;
        ctx.set_stage(ProcessingStatus::Uploading);
        tracker.update_progress(ProcessingStatus::Uploading, 0.0, HashMap::new());

        let remote_id = self
            .client
            .upload_video_with_progress(
                &video.file.path,
                &self.processing.index_name,
                |sent, total| {
                    let percent = if total == 0 {
                        100.0
                    } else {
                        sent as f64 / total as f64 * 100.0
                    };
                    tracker.update_progress(ProcessingStatus::Uploading, percent, HashMap::new());
                },
            )
            .await?;
        info!(video_id = %video.id, remote_video_id = %remote_id, "Upload finished");
        video.remote_video_id = Some(remote_id.clone());

        // Processing
        video.transition(ProcessingStatus::Processing)?;
        ctx.set_stage(ProcessingStatus::Processing);
        tracker.update_progress(ProcessingStatus::Processing, 0.0, HashMap::new());

        let options: Map<String, Value> = self
            .processing
            .task_options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let task_id = self
            .client
            .create_task(&self.processing.task_type, &remote_id, &options)
            .await?;
        tracker.update_progress(
            ProcessingStatus::Processing,
            10.0,
            HashMap::from([("task_id".to_string(), json!(task_id))]),
        );

        let task = self
            .client
            .wait_for_task(&task_id, self.client.task_timeout())
            .await?;
        video.result = Some(task.result.clone().unwrap_or(Value::Null));
        tracker.update_progress(
            ProcessingStatus::Processing,
            100.0,
            HashMap::from([("task_id".to_string(), json!(task_id))]),
        );

        self.persist_result(video, &task_id, ctx).await?;

        video.transition(ProcessingStatus::Completed)?;
        ctx.set_stage(ProcessingStatus::Completed);
        tracker.update_progress(ProcessingStatus::Completed, 100.0, HashMap::new());
        info!(video_id = %video.id, task_id = %task_id, "Upload completed");
        Ok(())
    }

    async fn validate(&self, path: &Path, tracker: &ProgressTracker) -> IngestResult<VideoMetadata> {
        let file_validator = Arc::clone(&self.file_validator);
        let security = Arc::clone(&self.security);
        let integrity = Arc::clone(&self.integrity);
        let tracker = tracker.clone();
        let path = path.to_path_buf();

        blocking(move || {
            file_validator.validate(&path)?;
            tracker.update_progress(ProcessingStatus::Validating, 25.0, HashMap::new());
            security.validate_and_secure(&path)?;
            tracker.update_progress(ProcessingStatus::Validating, 50.0, HashMap::new());
            integrity.check_video(&path)
        })
        .await
    }

    async fn quarantine_video(
        &self,
        video: &mut Video,
        err: &IngestError,
        tracker: &ProgressTracker,
    ) -> IngestResult<()> {
        let reason = err.reason();
        warn!(video_id = %video.id, error_type = err.kind_name(), "Validation failed: {}", reason);

        let mut extra = Map::new();
        extra.insert("video_id".to_string(), json!(video.id));
        extra.insert("error_type".to_string(), json!(err.kind_name()));

        let quarantine = Arc::clone(&self.quarantine);
        let source = video.file.path.clone();
        let record_reason = reason.clone();
        let quarantined = blocking(move || {
            quarantine.quarantine_file(&source, &record_reason, Some(extra))
        })
        .await?;

        video.quarantine_path = Some(quarantined.clone());
        video.error = Some(reason.clone());
        video.transition(ProcessingStatus::Quarantined)?;
        tracker.update_progress(
            ProcessingStatus::Quarantined,
            100.0,
            HashMap::from([
                ("reason".to_string(), json!(reason)),
                ("quarantine_path".to_string(), json!(quarantined.display().to_string())),
            ]),
        );
        Ok(())
    }

    /// Write the result next to the processed video via a tracked temp file
    async fn persist_result(
        &self,
        video: &mut Video,
        task_id: &str,
        ctx: &mut UploadContext,
    ) -> IngestResult<()> {
        let (mut file, temp_path) = ctx.create_temp_file(&format!("{}-", video.id), ".json")?;
        let record = json!({
            "video_id": video.id,
            "remote_video_id": video.remote_video_id,
            "task_id": task_id,
            "metadata": video.metadata,
            "result": video.result,
        });
        let bytes = serde_json::to_vec_pretty(&record)?;

        let directories = Arc::clone(&self.directories);
        let stored_video = video.file.path.clone();
        let result_name = format!("{}.result.json", video.id);
        let video_name = stored_video
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.{}", video.id, video.file.format));

        let processed = blocking(move || {
            file.write_all(&bytes)
                .and_then(|_| file.sync_all())
                .map_err(|e| {
                    IngestError::storage(format!("Failed to write {}", temp_path.display()), e)
                })?;
            drop(file);
            directories.move_file(&temp_path, PROCESSED_DIR, Some(&result_name))?;
            directories.move_file(&stored_video, PROCESSED_DIR, Some(&video_name))
        })
        .await?;

        if !self.directories.is_test_mode() {
            video.file.path = processed;
        }
        Ok(())
    }
}

/// Run blocking filesystem work off the async workers
async fn blocking<T, F>(f: F) -> IngestResult<T>
where
    F: FnOnce() -> IngestResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        IngestError::storage(
            "Blocking filesystem task failed",
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        )
    })?
}
