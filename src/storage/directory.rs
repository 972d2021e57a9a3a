//! On-disk layout and permissions under a single base directory

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::StorageSettings;
use crate::domain::errors::{IngestError, IngestResult};
use crate::utils::path::normalize_lexically;

/// Subdirectories created by `DirectoryManager::initialize`
pub const UPLOADS_DIR: &str = "uploads";
pub const PROCESSING_DIR: &str = "processing";
pub const PROCESSED_DIR: &str = "processed";
pub const QUARANTINE_DIR: &str = "quarantine";
pub const TEMP_DIR: &str = "temp";

pub const LAYOUT: [&str; 5] = [
    UPLOADS_DIR,
    PROCESSING_DIR,
    PROCESSED_DIR,
    QUARANTINE_DIR,
    TEMP_DIR,
];

/// Owns the directory layout below `base_dir`
#[derive(Debug, Clone)]
pub struct DirectoryManager {
    base_dir: PathBuf,
    dir_mode: u32,
    file_mode: u32,
    test_mode: bool,
}

impl DirectoryManager {
    pub fn new(settings: &StorageSettings) -> Self {
        let base_dir = if settings.base_dir.is_absolute() {
            settings.base_dir.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&settings.base_dir))
                .unwrap_or_else(|_| settings.base_dir.clone())
        };

        Self {
            base_dir: normalize_lexically(&base_dir),
            dir_mode: settings.dir_mode,
            file_mode: settings.file_mode,
            test_mode: settings.test_mode,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    /// Create the base directory and every layout subdirectory
    pub fn initialize(&self) -> IngestResult<Vec<PathBuf>> {
        self.create_dir(&self.base_dir)?;
        LAYOUT
            .iter()
            .map(|subdir| self.ensure_directory_exists(subdir))
            .collect()
    }

    /// Create `subdir` below the base directory if missing; idempotent
    pub fn ensure_directory_exists(&self, subdir: &str) -> IngestResult<PathBuf> {
        let path = self.get_path(subdir, None)?;
        self.create_dir(&path)?;
        Ok(path)
    }

    fn create_dir(&self, path: &Path) -> IngestResult<()> {
        if self.test_mode || path.is_dir() {
            return Ok(());
        }

        fs::create_dir_all(path).map_err(|e| {
            IngestError::storage(format!("Failed to create directory {}", path.display()), e)
        })?;
        fs::set_permissions(path, fs::Permissions::from_mode(self.dir_mode)).map_err(|e| {
            IngestError::storage(
                format!("Failed to set permissions on {}", path.display()),
                e,
            )
        })?;
        debug!("Created directory {} ({:o})", path.display(), self.dir_mode);
        Ok(())
    }

    /// Resolve `subdir[/filename]`, rejecting anything that escapes the base directory
    pub fn get_path(&self, subdir: &str, filename: Option<&str>) -> IngestResult<PathBuf> {
        let mut path = self.base_dir.join(subdir);
        if let Some(name) = filename {
            path.push(name);
        }

        let resolved = normalize_lexically(&path);
        if !resolved.starts_with(&self.base_dir) {
            return Err(IngestError::storage(
                format!("Path {} escapes base directory", path.display()),
                io::Error::new(io::ErrorKind::PermissionDenied, "path traversal"),
            ));
        }

        // Existing entries may be symlinks pointing elsewhere
        if !self.test_mode && resolved.exists() {
            let canonical = resolved.canonicalize().map_err(|e| {
                IngestError::storage(format!("Failed to resolve {}", resolved.display()), e)
            })?;
            let canonical_base = self.base_dir.canonicalize().map_err(|e| {
                IngestError::storage(format!("Failed to resolve {}", self.base_dir.display()), e)
            })?;
            if !canonical.starts_with(&canonical_base) {
                return Err(IngestError::storage(
                    format!("Path {} resolves outside base directory", path.display()),
                    io::Error::new(io::ErrorKind::PermissionDenied, "path traversal"),
                ));
            }
        }

        Ok(resolved)
    }

    /// Move `source` into `dest_subdir`, keeping its name unless `filename` is given
    pub fn move_file(
        &self,
        source: &Path,
        dest_subdir: &str,
        filename: Option<&str>,
    ) -> IngestResult<PathBuf> {
        let name = match filename {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    IngestError::storage(
                        format!("Source has no file name: {}", source.display()),
                        io::Error::new(io::ErrorKind::InvalidInput, "missing file name"),
                    )
                })?,
        };

        let destination = self.get_path(dest_subdir, Some(&name))?;
        if self.test_mode {
            return Ok(destination);
        }

        self.ensure_directory_exists(dest_subdir)?;
        rename_or_copy(source, &destination).map_err(|e| {
            IngestError::storage(
                format!(
                    "Failed to move {} to {}",
                    source.display(),
                    destination.display()
                ),
                e,
            )
        })?;
        set_mode_no_follow(&destination, self.file_mode).map_err(|e| {
            IngestError::storage(
                format!("Failed to set permissions on {}", destination.display()),
                e,
            )
        })?;

        info!("Moved {} -> {}", source.display(), destination.display());
        Ok(destination)
    }

    /// Remove empty directories below `subdir`, deepest first; the subdir itself stays
    pub fn cleanup_empty_dirs(&self, subdir: &str) -> IngestResult<usize> {
        let root = self.get_path(subdir, None)?;
        if self.test_mode || !root.is_dir() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir())
        {
            // Non-empty or concurrently modified directories fail here; both are fine
            if fs::remove_dir(entry.path()).is_ok() {
                debug!("Removed empty directory {}", entry.path().display());
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Removed {} empty directories under {}", removed, root.display());
        }
        Ok(removed)
    }
}

/// Atomic rename, falling back to copy + remove across filesystems.
/// Symlinks are moved as links; their targets are never read.
pub(crate) fn rename_or_copy(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32) => {
            warn!(
                "Cross-device move of {}, copying instead of renaming",
                source.display()
            );
            if fs::symlink_metadata(source)?.file_type().is_symlink() {
                std::os::unix::fs::symlink(fs::read_link(source)?, destination)?;
            } else {
                fs::copy(source, destination)?;
            }
            fs::remove_file(source)
        }
        Err(e) => Err(e),
    }
}

/// chmod that never follows a symlink; returns false when `path` is a link and was left alone
pub(crate) fn set_mode_no_follow(path: &Path, mode: u32) -> io::Result<bool> {
    if fs::symlink_metadata(path)?.file_type().is_symlink() {
        debug!("Not changing mode through symlink {}", path.display());
        return Ok(false);
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> DirectoryManager {
        DirectoryManager::new(&StorageSettings {
            base_dir: dir.path().to_path_buf(),
            ..StorageSettings::default()
        })
    }

    #[test]
    fn test_ensure_directory_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let first = manager.ensure_directory_exists("uploads").unwrap();
        let second = manager.ensure_directory_exists("uploads").unwrap();

        assert_eq!(first, second);
        assert!(first.is_dir());
        let mode = fs::metadata(&first).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn test_get_path_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        assert!(manager.get_path("uploads", Some("../../etc/passwd")).is_err());
        assert!(manager.get_path("../outside", None).is_err());
        assert!(manager.get_path("uploads", Some("clip.mp4")).is_ok());
    }

    #[test]
    fn test_get_path_rejects_symlink_escape() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.ensure_directory_exists("uploads").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("uploads/link")).unwrap();

        assert!(manager.get_path("uploads", Some("link")).is_err());
    }

    #[test]
    fn test_move_file_sets_mode() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let source = dir.path().join("incoming.mp4");
        fs::write(&source, b"payload").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o600)).unwrap();

        let moved = manager
            .move_file(&source, "processed", Some("stored.mp4"))
            .unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&moved).unwrap(), b"payload");
        assert_eq!(moved, dir.path().join("processed/stored.mp4"));
        let mode = fs::metadata(&moved).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_move_file_leaves_symlink_target_alone() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let target = dir.path().join("victim.txt");
        fs::write(&target, b"keep").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o640)).unwrap();
        let link = dir.path().join("link.mp4");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let moved = manager.move_file(&link, "processing", None).unwrap();

        assert!(fs::symlink_metadata(&moved).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&moved).unwrap(), target);
        assert_eq!(fs::metadata(&target).unwrap().permissions().mode() & 0o777, 0o640);
    }

    #[test]
    fn test_missing_source_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let err = manager
            .move_file(&dir.path().join("missing.mp4"), "uploads", None)
            .unwrap_err();
        assert!(matches!(err, IngestError::Storage { .. }));
    }

    #[test]
    fn test_cleanup_empty_dirs_bottom_up() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let root = manager.ensure_directory_exists("processing").unwrap();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::create_dir_all(root.join("keep")).unwrap();
        fs::write(root.join("keep/file.bin"), b"x").unwrap();

        let removed = manager.cleanup_empty_dirs("processing").unwrap();

        assert_eq!(removed, 3);
        assert!(root.is_dir());
        assert!(!root.join("a").exists());
        assert!(root.join("keep/file.bin").exists());
    }

    #[test]
    fn test_test_mode_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let manager = DirectoryManager::new(&StorageSettings {
            base_dir: dir.path().join("dry"),
            test_mode: true,
            ..StorageSettings::default()
        });

        let path = manager.ensure_directory_exists("uploads").unwrap();
        assert_eq!(path, dir.path().join("dry/uploads"));
        assert!(!path.exists());

        let moved = manager
            .move_file(Path::new("/nowhere/clip.mp4"), "uploads", None)
            .unwrap();
        assert_eq!(moved, dir.path().join("dry/uploads/clip.mp4"));
    }
}
