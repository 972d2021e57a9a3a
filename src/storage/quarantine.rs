//! Isolation of rejected files with a forensic sidecar record
//!
//! Every quarantined payload `<name>` gets a JSON sidecar `<name>.meta`.
//! A `.meta` entry only counts as a sidecar while its payload exists, so an
//! upload that itself ends in `.meta` is still listed as a payload.
//! The move happens before the sidecar is written, so a crash in between
//! leaves a payload without a record; listing still shows such files.
//!
//! Symlinks are quarantined as links. Modes are never changed through them.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::StorageSettings;
use crate::domain::errors::{IngestError, IngestResult};
use crate::domain::model::{FileInfo, QuarantineRecord};
use crate::storage::directory::{
    rename_or_copy, set_mode_no_follow, DirectoryManager, QUARANTINE_DIR,
};
use crate::utils::path::sanitize_file_name;
use crate::validation::mime::{sniff_file, MIME_UNKNOWN};

/// Sidecar extension appended to quarantined file names
pub const SIDECAR_EXTENSION: &str = "meta";

/// One quarantined payload, optionally with its record
#[derive(Debug, Clone, Serialize)]
pub struct QuarantineEntry {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<QuarantineRecord>,
}

pub struct QuarantineManager {
    directories: DirectoryManager,
    quarantine_mode: u32,
    file_mode: u32,
}

impl QuarantineManager {
    pub fn new(directories: DirectoryManager, settings: &StorageSettings) -> Self {
        Self {
            directories,
            quarantine_mode: settings.quarantine_mode,
            file_mode: settings.file_mode,
        }
    }

    fn test_mode(&self) -> bool {
        self.directories.is_test_mode()
    }

    /// Path of the sidecar record for a quarantined file
    pub fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(SIDECAR_EXTENSION);
        PathBuf::from(name)
    }

    /// Whether `path` is an entry quarantine can hold: a regular file or a symlink
    pub fn can_quarantine(path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.file_type().is_file() || m.file_type().is_symlink())
            .unwrap_or(false)
    }

    /// True for `<payload>.meta` when `<payload>` is still present
    pub fn is_sidecar(path: &Path) -> bool {
        if !path.extension().is_some_and(|ext| ext == SIDECAR_EXTENSION) {
            return false;
        }
        fs::symlink_metadata(path.with_extension("")).is_ok()
    }

    /// Move `path` into quarantine and record why
    pub fn quarantine_file(
        &self,
        path: &Path,
        reason: &str,
        extra: Option<Map<String, Value>>,
    ) -> IngestResult<PathBuf> {
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = format!(
            "{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S_%6f"),
            sanitize_file_name(&original_name)
        );

        if self.test_mode() {
            return self
                .directories
                .get_path(QUARANTINE_DIR, Some(&name))
                .map_err(into_quarantine_error);
        }

        if !Self::can_quarantine(path) {
            return Err(IngestError::quarantine(
                format!("Refusing to quarantine non-regular entry {}", path.display()),
                None,
            ));
        }
        // Captured before the move changes the mode
        let file_info = describe_file(path).map_err(|e| {
            IngestError::quarantine(format!("Cannot inspect {}", path.display()), Some(e))
        })?;

        let destination = self
            .directories
            .move_file(path, QUARANTINE_DIR, Some(&name))
            .map_err(into_quarantine_error)?;
        set_mode_no_follow(&destination, self.quarantine_mode).map_err(|e| {
            IngestError::quarantine(
                format!("Failed to restrict {}", destination.display()),
                Some(e),
            )
        })?;

        let record = QuarantineRecord {
            original_path: path.display().to_string(),
            quarantine_time: Utc::now(),
            reason: reason.to_string(),
            file_info,
            extra: extra.unwrap_or_default(),
        };
        self.write_record(&destination, &record)?;

        warn!(
            path = %path.display(),
            quarantine_path = %destination.display(),
            reason,
            "File quarantined"
        );
        Ok(destination)
    }

    /// Write (or replace) the sidecar record for `path`
    pub fn write_record(&self, path: &Path, record: &QuarantineRecord) -> IngestResult<()> {
        let sidecar = Self::sidecar_path(path);
        let json = serde_json::to_vec_pretty(record)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(self.quarantine_mode)
            .open(&sidecar)
            .map_err(|e| {
                IngestError::quarantine(
                    format!("Failed to create {}", sidecar.display()),
                    Some(e),
                )
            })?;
        file.write_all(&json).map_err(|e| {
            IngestError::quarantine(format!("Failed to write {}", sidecar.display()), Some(e))
        })?;
        set_mode_no_follow(&sidecar, self.quarantine_mode).map_err(|e| {
            IngestError::quarantine(format!("Failed to restrict {}", sidecar.display()), Some(e))
        })?;
        Ok(())
    }

    /// The sidecar record for a quarantined file, if one exists
    pub fn get_quarantine_info(&self, path: &Path) -> IngestResult<Option<QuarantineRecord>> {
        let sidecar = Self::sidecar_path(path);
        let content = match fs::read(&sidecar) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(IngestError::quarantine(
                    format!("Failed to read {}", sidecar.display()),
                    Some(e),
                ))
            }
        };
        let record = serde_json::from_slice(&content).map_err(|e| {
            IngestError::quarantine(
                format!("Corrupt quarantine record {}: {}", sidecar.display(), e),
                None,
            )
        })?;
        Ok(Some(record))
    }

    /// Quarantined payloads, oldest name first
    pub fn list_quarantined_files(
        &self,
        include_metadata: bool,
    ) -> IngestResult<Vec<QuarantineEntry>> {
        let root = self
            .directories
            .get_path(QUARANTINE_DIR, None)
            .map_err(into_quarantine_error)?;
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() || entry.file_type().is_symlink())
        {
            let path = entry.into_path();
            if Self::is_sidecar(&path) {
                continue;
            }
            let metadata = if include_metadata {
                self.get_quarantine_info(&path).unwrap_or_else(|e| {
                    warn!("Skipping unreadable record for {}: {}", path.display(), e);
                    None
                })
            } else {
                None
            };
            entries.push(QuarantineEntry { path, metadata });
        }
        Ok(entries)
    }

    /// Delete payloads and records older than `max_age_days`; returns how many
    pub fn cleanup_quarantine(&self, max_age_days: u32) -> IngestResult<usize> {
        if self.test_mode() {
            return Ok(0);
        }

        let cutoff = Duration::days(i64::from(max_age_days));
        let now = Utc::now();
        let mut removed = 0;

        for entry in self.list_quarantined_files(true)? {
            let Some(record) = entry.metadata else {
                debug!("No record for {}, keeping it", entry.path.display());
                continue;
            };
            if now - record.quarantine_time <= cutoff {
                continue;
            }

            fs::remove_file(&entry.path).map_err(|e| {
                IngestError::quarantine(
                    format!("Failed to delete {}", entry.path.display()),
                    Some(e),
                )
            })?;
            let sidecar = Self::sidecar_path(&entry.path);
            if let Err(e) = fs::remove_file(&sidecar) {
                warn!("Failed to delete {}: {}", sidecar.display(), e);
            }
            debug!("Expired quarantined file {}", entry.path.display());
            removed += 1;
        }

        if removed > 0 {
            info!("Removed {} expired quarantined files", removed);
        }
        Ok(removed)
    }

    /// Move a quarantined file back out to `destination` and drop its record
    pub fn restore_file(&self, quarantine_path: &Path, destination: &Path) -> IngestResult<PathBuf> {
        if self.test_mode() {
            return Ok(destination.to_path_buf());
        }

        let root = self
            .directories
            .get_path(QUARANTINE_DIR, None)
            .and_then(|root| {
                root.canonicalize().map_err(|e| {
                    IngestError::storage(format!("Failed to resolve {}", root.display()), e)
                })
            })
            .map_err(into_quarantine_error)?;
        let resolved = quarantine_path.canonicalize().map_err(|e| {
            IngestError::quarantine(
                format!("Cannot resolve {}", quarantine_path.display()),
                Some(e),
            )
        })?;
        if !resolved.starts_with(&root) || resolved == root {
            return Err(IngestError::quarantine(
                format!("{} is not in quarantine", quarantine_path.display()),
                None,
            ));
        }

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                IngestError::quarantine(format!("Failed to create {}", parent.display()), Some(e))
            })?;
        }
        rename_or_copy(&resolved, destination).map_err(|e| {
            IngestError::quarantine(
                format!(
                    "Failed to restore {} to {}",
                    resolved.display(),
                    destination.display()
                ),
                Some(e),
            )
        })?;
        set_mode_no_follow(destination, self.file_mode).map_err(|e| {
            IngestError::quarantine(
                format!("Failed to set permissions on {}", destination.display()),
                Some(e),
            )
        })?;

        let sidecar = Self::sidecar_path(&resolved);
        match fs::remove_file(&sidecar) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(IngestError::quarantine(
                    format!("Failed to delete {}", sidecar.display()),
                    Some(e),
                ))
            }
        }

        info!(
            "Restored {} -> {}",
            quarantine_path.display(),
            destination.display()
        );
        Ok(destination.to_path_buf())
    }
}

fn describe_file(path: &Path) -> io::Result<FileInfo> {
    let metadata = fs::symlink_metadata(path)?;
    // Never read through a link
    let mime_type = if metadata.file_type().is_symlink() {
        "inode/symlink"
    } else {
        sniff_file(path).unwrap_or(MIME_UNKNOWN)
    };
    Ok(FileInfo {
        size: metadata.len(),
        mime_type: mime_type.to_string(),
        mode: format!("{:o}", metadata.permissions().mode() & 0o777),
    })
}

fn into_quarantine_error(err: IngestError) -> IngestError {
    match err {
        IngestError::Storage { message, source } => IngestError::quarantine(message, Some(source)),
        other => IngestError::quarantine(other.to_string(), None),
    }
}
