// Domain models - Core types and data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::domain::errors::{IngestError, IngestResult};


/// Lifecycle state of an uploaded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Uploading,
    Validating,
    Processing,
    Completed,
    Failed,
    Quarantined,
}

impl ProcessingStatus {
    /// Completed, Failed and Quarantined never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Completed | ProcessingStatus::Failed | ProcessingStatus::Quarantined
        )
    }

    /// Position in the pipeline order Pending -> Validating -> Uploading -> Processing -> terminal
    fn pipeline_rank(&self) -> u8 {
        match self {
            ProcessingStatus::Pending => 0,
            ProcessingStatus::Validating => 1,
            ProcessingStatus::Uploading => 2,
            ProcessingStatus::Processing => 3,
            ProcessingStatus::Completed
            | ProcessingStatus::Failed
            | ProcessingStatus::Quarantined => 4,
        }
    }

    /// Weight of the stage in overall progress (0.0 - 1.0)
    pub fn progress_weight(&self) -> f64 {
        match self {
            ProcessingStatus::Pending => 0.0,
            ProcessingStatus::Uploading => 0.2,
            ProcessingStatus::Validating => 0.3,
            ProcessingStatus::Processing => 0.4,
            ProcessingStatus::Completed
            | ProcessingStatus::Failed
            | ProcessingStatus::Quarantined => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Uploading => "uploading",
            ProcessingStatus::Validating => "validating",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the video bytes live on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    pub path: PathBuf,
    pub filename: String,
    pub format: String,
    pub size: u64,
}

impl FileReference {
    /// Build a reference from an existing file
    pub fn from_path(path: &Path) -> IngestResult<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            IngestError::FileValidation(format!("Cannot stat {}: {}", path.display(), e))
        })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                IngestError::FileValidation(format!("Path has no file name: {}", path.display()))
            })?;
        let format = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            filename,
            format,
            size: metadata.len(),
        })
    }
}

/// An uploaded video moving through the ingestion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub file: FileReference,
    pub status: ProcessingStatus,
    pub metadata: Option<VideoMetadata>,
    /// Identifier assigned by the remote analysis service
    pub remote_video_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub quarantine_path: Option<PathBuf>,
}

impl Video {
    pub fn new(id: impl Into<String>, file: FileReference) -> Self {
        Self {
            id: id.into(),
            file,
            status: ProcessingStatus::Pending,
            metadata: None,
            remote_video_id: None,
            result: None,
            error: None,
            quarantine_path: None,
        }
    }

    /// Advance the status; terminal states are final and stages never go backwards
    pub fn transition(&mut self, next: ProcessingStatus) -> IngestResult<()> {
        if self.status.is_terminal() {
            return Err(IngestError::InvalidState(format!(
                "Video {} is already {} and cannot become {}",
                self.id, self.status, next
            )));
        }
        if next.pipeline_rank() < self.status.pipeline_rank() {
            return Err(IngestError::InvalidState(format!(
                "Video {} cannot move back from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// Technical properties of a validated video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    pub total_frames: u64,
}

/// Progress of one stage for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub stage: ProcessingStatus,
    /// Clamped to 0.0 - 100.0
    pub progress: f64,
    pub start_time: DateTime<Utc>,
    pub details: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
}

impl ProgressInfo {
    pub fn new(stage: ProcessingStatus, progress: f64) -> Self {
        Self {
            stage,
            progress: clamp_percent(progress),
            start_time: Utc::now(),
            details: HashMap::new(),
            error: None,
        }
    }
}

/// Clamp a percentage into 0..=100, treating NaN as 0
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// File facts captured at quarantine time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub size: u64,
    pub mime_type: String,
    /// Permission bits as an octal string, e.g. "644"
    pub mode: String,
}

/// Sidecar record written next to every quarantined file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub original_path: String,
    pub quarantine_time: DateTime<Utc>,
    pub reason: String,
    pub file_info: FileInfo,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Remote task lifecycle: pending -> processing -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Task state as reported by `GET /tasks/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
}
