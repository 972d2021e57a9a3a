//! Scoped temporary resources for one upload
//!
//! Everything tracked by an [`UploadContext`] is released when the context
//! is dropped, whichever way the upload ends.

use std::any::Any;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{IngestError, IngestResult};
use crate::domain::model::ProcessingStatus;
use crate::engine::progress::ProgressTracker;

pub struct UploadContext {
    video_id: String,
    temp_root: PathBuf,
    tracker: Option<ProgressTracker>,
    stage: ProcessingStatus,
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    resources: HashMap<String, Box<dyn Any + Send>>,
}

impl UploadContext {
    pub fn new(video_id: &str, temp_root: &Path, tracker: Option<ProgressTracker>) -> Self {
        Self {
            video_id: video_id.to_string(),
            temp_root: temp_root.to_path_buf(),
            tracker,
            stage: ProcessingStatus::Pending,
            files: Vec::new(),
            dirs: Vec::new(),
            resources: HashMap::new(),
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn tracker(&self) -> Option<&ProgressTracker> {
        self.tracker.as_ref()
    }

    /// Stage blamed if the context exits with an error
    pub fn set_stage(&mut self, stage: ProcessingStatus) {
        self.stage = stage;
    }

    pub fn stage(&self) -> ProcessingStatus {
        self.stage
    }

    /// Finish the scope, reporting `result` to the tracker if it failed.
    ///
    /// Tracked files and directories are removed before the result is returned.
    pub fn exit<T>(self, result: IngestResult<T>) -> IngestResult<T> {
        if let (Err(err), Some(tracker)) = (&result, &self.tracker) {
            tracker.mark_stage_error(
                self.stage,
                &format!("{}: {}", err.kind_name(), err.reason()),
                HashMap::new(),
            );
        }
        drop(self);
        result
    }

    /// Create an empty temp file under the temp root and track it
    pub fn create_temp_file(&mut self, prefix: &str, suffix: &str) -> IngestResult<(File, PathBuf)> {
        self.ensure_temp_root()?;
        let (file, path) = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.temp_root)
            .and_then(|named| named.keep().map_err(|e| e.error))
            .map_err(|e| {
                IngestError::storage(
                    format!("Failed to create temp file in {}", self.temp_root.display()),
                    e,
                )
            })?;
        self.track_file(&path);
        Ok((file, path))
    }

    /// Create a temp directory under the temp root and track it
    pub fn create_temp_dir(&mut self, prefix: &str) -> IngestResult<PathBuf> {
        self.ensure_temp_root()?;
        let path = self
            .temp_root
            .join(format!("{}{}", prefix, Uuid::new_v4().simple()));
        fs::create_dir(&path).map_err(|e| {
            IngestError::storage(format!("Failed to create temp dir {}", path.display()), e)
        })?;
        self.track_dir(&path);
        Ok(path)
    }

    /// Temp file removed as soon as the returned guard drops
    pub fn temp_file(&mut self, prefix: &str, suffix: &str) -> IngestResult<ScopedPath> {
        let (_, path) = self.create_temp_file(prefix, suffix)?;
        Ok(ScopedPath { path, is_dir: false })
    }

    /// Temp directory removed as soon as the returned guard drops
    pub fn temp_dir(&mut self, prefix: &str) -> IngestResult<ScopedPath> {
        let path = self.create_temp_dir(prefix)?;
        Ok(ScopedPath { path, is_dir: true })
    }

    pub fn track_file(&mut self, path: &Path) {
        self.files.push(path.to_path_buf());
    }

    pub fn track_dir(&mut self, path: &Path) {
        self.dirs.push(path.to_path_buf());
    }

    pub fn add_resource<T: Any + Send>(&mut self, key: &str, resource: T) {
        self.resources.insert(key.to_string(), Box::new(resource));
    }

    pub fn get_resource<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.resources.get(key).and_then(|r| r.downcast_ref::<T>())
    }

    pub fn get_resource_mut<T: Any + Send>(&mut self, key: &str) -> Option<&mut T> {
        self.resources
            .get_mut(key)
            .and_then(|r| r.downcast_mut::<T>())
    }

    /// Take a resource out of the registry; `None` if absent or of another type
    pub fn remove_resource<T: Any + Send>(&mut self, key: &str) -> Option<T> {
        if !self.resources.get(key).is_some_and(|r| r.is::<T>()) {
            return None;
        }
        self.resources
            .remove(key)
            .and_then(|r| r.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    fn ensure_temp_root(&self) -> IngestResult<()> {
        fs::create_dir_all(&self.temp_root).map_err(|e| {
            IngestError::storage(
                format!("Failed to create temp root {}", self.temp_root.display()),
                e,
            )
        })
    }

    fn cleanup(&mut self) {
        // Handles go first so their files can be removed
        self.resources.clear();

        for path in self.files.drain(..) {
            remove_quietly(&path, false);
        }
        while let Some(path) = self.dirs.pop() {
            remove_quietly(&path, true);
        }
    }
}

impl Drop for UploadContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// A temp path deleted when dropped
#[derive(Debug)]
pub struct ScopedPath {
    path: PathBuf,
    is_dir: bool,
}

impl ScopedPath {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for ScopedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedPath {
    fn drop(&mut self) {
        remove_quietly(&self.path, self.is_dir);
    }
}

fn remove_quietly(path: &Path, is_dir: bool) {
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => debug!("Removed temporary {}", path.display()),
        // Already moved or removed by its own guard
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temporary {}: {}", path.display(), e),
    }
}
