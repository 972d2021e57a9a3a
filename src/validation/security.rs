//! Fail-fast security checks for untrusted uploads
//!
//! Checks run in a fixed order and stop at the first violation:
//! existence, permissions, ownership, path resolution, content.
//!
//! Ownership is compared against the current process uid/gid, which is only
//! meaningful on local filesystems; network filesystems may remap ids.

use std::fs::{self, File, Metadata};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{getgid, getuid};
use tracing::{debug, warn};

use crate::config::StorageSettings;
use crate::domain::errors::{IngestError, IngestResult};
use crate::utils::path::find_traversal_marker;

const WORLD_WRITABLE: u32 = 0o002;

/// Rejects files that are unsafe to trust
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    base_dir: PathBuf,
    file_mode: u32,
    dir_mode: u32,
}

impl SecurityValidator {
    pub fn new(base_dir: &Path, settings: &StorageSettings) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            file_mode: settings.file_mode,
            dir_mode: settings.dir_mode,
        }
    }

    /// Run every check; the first failure is returned
    pub fn validate_file(&self, path: &Path) -> IngestResult<()> {
        let metadata = self.check_exists(path)?;
        self.check_permissions(path, &metadata)?;
        self.check_ownership(path, &metadata)?;
        self.check_path(path)?;
        self.check_content(path, &metadata)?;
        debug!("Security validation passed for {}", path.display());
        Ok(())
    }

    /// Apply the canonical modes to the file and its parent directory
    pub fn secure_file(&self, path: &Path) -> IngestResult<()> {
        let is_link = fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .map_err(|e| {
                IngestError::Security(format!("Cannot inspect {}: {}", path.display(), e))
            })?;
        if is_link {
            return Err(IngestError::Security(format!(
                "Refusing to change permissions through symlink {}",
                path.display()
            )));
        }
        fs::set_permissions(path, fs::Permissions::from_mode(self.file_mode)).map_err(|e| {
            IngestError::Security(format!(
                "Failed to set permissions on {}: {}",
                path.display(),
                e
            ))
        })?;

        if let Some(parent) = path.parent() {
            fs::set_permissions(parent, fs::Permissions::from_mode(self.dir_mode)).map_err(
                |e| {
                    IngestError::Security(format!(
                        "Failed to set permissions on {}: {}",
                        parent.display(),
                        e
                    ))
                },
            )?;
        }
        Ok(())
    }

    pub fn validate_and_secure(&self, path: &Path) -> IngestResult<()> {
        self.validate_file(path)?;
        self.secure_file(path)
    }

    fn check_exists(&self, path: &Path) -> IngestResult<Metadata> {
        let metadata = fs::metadata(path).map_err(|_| {
            IngestError::Security(format!("File does not exist: {}", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(IngestError::Security(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }
        File::open(path).map_err(|e| {
            IngestError::Security(format!("File is not readable: {}: {}", path.display(), e))
        })?;
        Ok(metadata)
    }

    fn check_permissions(&self, path: &Path, metadata: &Metadata) -> IngestResult<()> {
        if metadata.mode() & WORLD_WRITABLE != 0 {
            warn!("Rejecting world-writable file {}", path.display());
            return Err(IngestError::Security(format!(
                "File is world-writable: {}",
                path.display()
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let parent_meta = fs::metadata(parent).map_err(|e| {
                IngestError::Security(format!(
                    "Cannot inspect parent directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
            if parent_meta.mode() & WORLD_WRITABLE != 0 {
                warn!("Rejecting file in world-writable directory {}", parent.display());
                return Err(IngestError::Security(format!(
                    "Parent directory is world-writable: {}",
                    parent.display()
                )));
            }
        }
        Ok(())
    }

    fn check_ownership(&self, path: &Path, metadata: &Metadata) -> IngestResult<()> {
        let uid = getuid().as_raw();
        let gid = getgid().as_raw();
        if metadata.uid() != uid && metadata.gid() != gid {
            return Err(IngestError::Security(format!(
                "File {} is owned by uid {} gid {}, expected uid {} or gid {}",
                path.display(),
                metadata.uid(),
                metadata.gid(),
                uid,
                gid
            )));
        }
        Ok(())
    }

    fn check_path(&self, path: &Path) -> IngestResult<()> {
        if let Some(marker) = find_traversal_marker(path) {
            return Err(IngestError::Security(format!(
                "Path contains traversal marker '{}': {}",
                marker,
                path.display()
            )));
        }

        let resolved = path.canonicalize().map_err(|e| {
            IngestError::Security(format!("Cannot resolve {}: {}", path.display(), e))
        })?;
        let base = self.base_dir.canonicalize().map_err(|e| {
            IngestError::Security(format!(
                "Base directory {} is unavailable: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        if !resolved.starts_with(&base) {
            return Err(IngestError::Security(format!(
                "Path {} resolves outside base directory {}",
                path.display(),
                base.display()
            )));
        }
        Ok(())
    }

    fn check_content(&self, path: &Path, metadata: &Metadata) -> IngestResult<()> {
        if metadata.len() == 0 {
            return Err(IngestError::Security(format!(
                "File is empty: {}",
                path.display()
            )));
        }

        let link_meta = fs::symlink_metadata(path).map_err(|e| {
            IngestError::Security(format!("Cannot inspect {}: {}", path.display(), e))
        })?;
        if link_meta.file_type().is_symlink() {
            return Err(IngestError::Security(format!(
                "Symbolic links are not accepted: {}",
                path.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SecurityValidator) {
        let dir = TempDir::new().unwrap();
        let validator = SecurityValidator::new(dir.path(), &StorageSettings::default());
        (dir, validator)
    }

    fn write_file(dir: &Path, name: &str, data: &[u8], mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_accepts_safe_file() {
        let (dir, validator) = setup();
        let path = write_file(dir.path(), "clip.mp4", b"data", 0o644);
        assert!(validator.validate_file(&path).is_ok());
    }

    #[test]
    fn test_rejects_missing_file() {
        let (dir, validator) = setup();
        let err = validator
            .validate_file(&dir.path().join("missing.mp4"))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_rejects_directory() {
        let (dir, validator) = setup();
        let sub = dir.path().join("sub.mp4");
        fs::create_dir(&sub).unwrap();
        let err = validator.validate_file(&sub).unwrap_err();
        assert!(err.to_string().contains("Not a regular file"));
    }

    #[test]
    fn test_rejects_world_writable_file() {
        let (dir, validator) = setup();
        let path = write_file(dir.path(), "clip.mp4", b"data", 0o666);
        let err = validator.validate_file(&path).unwrap_err();
        assert!(matches!(err, IngestError::Security(_)));
        assert!(err.to_string().contains("world-writable"));
        // Validation alone never moves the file
        assert!(path.exists());
    }

    #[test]
    fn test_rejects_world_writable_parent() {
        let (dir, validator) = setup();
        let shared = dir.path().join("shared");
        fs::create_dir(&shared).unwrap();
        fs::set_permissions(&shared, fs::Permissions::from_mode(0o777)).unwrap();
        let path = write_file(&shared, "clip.mp4", b"data", 0o644);

        let err = validator.validate_file(&path).unwrap_err();
        assert!(err.to_string().contains("Parent directory is world-writable"));
    }

    #[test]
    fn test_rejects_path_outside_base() {
        let (dir, _) = setup();
        let base = dir.path().join("base");
        fs::create_dir(&base).unwrap();
        let validator = SecurityValidator::new(&base, &StorageSettings::default());
        let outside = write_file(dir.path(), "clip.mp4", b"data", 0o644);

        let err = validator.validate_file(&outside).unwrap_err();
        assert!(err.to_string().contains("outside base directory"));
    }

    #[test]
    fn test_rejects_traversal_markers() {
        let (dir, validator) = setup();
        fs::create_dir(dir.path().join("a")).unwrap();
        write_file(dir.path(), "clip.mp4", b"data", 0o644);
        let sneaky = dir.path().join("a/../clip.mp4");

        let err = validator.validate_file(&sneaky).unwrap_err();
        assert!(err.to_string().contains("traversal marker"));
    }

    #[test]
    fn test_rejects_empty_file() {
        let (dir, validator) = setup();
        let path = write_file(dir.path(), "empty.mp4", b"", 0o644);
        let err = validator.validate_file(&path).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_rejects_symlink() {
        let (dir, validator) = setup();
        let target = write_file(dir.path(), "real.mp4", b"data", 0o644);
        let link = dir.path().join("link.mp4");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = validator.validate_file(&link).unwrap_err();
        assert!(err.to_string().contains("Symbolic links"));
    }

    #[test]
    fn test_secure_file_applies_modes() {
        let (dir, validator) = setup();
        let sub = dir.path().join("in");
        fs::create_dir(&sub).unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o700)).unwrap();
        let path = write_file(&sub, "clip.mp4", b"data", 0o600);

        validator.validate_and_secure(&path).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o777, 0o644);
        assert_eq!(fs::metadata(&sub).unwrap().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_secure_file_does_not_follow_symlink() {
        let (dir, validator) = setup();
        let target = write_file(dir.path(), "real.mp4", b"data", 0o640);
        let link = dir.path().join("link.mp4");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = validator.secure_file(&link).unwrap_err();

        assert!(matches!(err, IngestError::Security(_)));
        assert_eq!(fs::metadata(&target).unwrap().mode() & 0o777, 0o640);
    }
}
