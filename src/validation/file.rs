//! Pre-flight checks on existence, size and extension

use std::path::Path;

use crate::config::ValidationSettings;
use crate::domain::errors::{IngestError, IngestResult};
use crate::utils::format_file_size;
use crate::utils::path::extension_of;

/// Cheap checks run before anything opens the file
#[derive(Debug, Clone)]
pub struct FileValidator {
    max_file_size: u64,
    allowed_extensions: Vec<String>,
}

impl FileValidator {
    pub fn new(settings: &ValidationSettings) -> Self {
        Self {
            max_file_size: settings.max_file_size_mb.saturating_mul(1024 * 1024),
            allowed_extensions: settings
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Returns the file size on success
    pub fn validate(&self, path: &Path) -> IngestResult<u64> {
        let metadata = std::fs::metadata(path).map_err(|_| {
            IngestError::FileValidation(format!("File does not exist: {}", path.display()))
        })?;

        if metadata.len() > self.max_file_size {
            return Err(IngestError::FileValidation(format!(
                "File size {} exceeds maximum {}",
                format_file_size(metadata.len()),
                format_file_size(self.max_file_size)
            )));
        }

        let extension = extension_of(path).unwrap_or_default();
        if !self.allowed_extensions.contains(&extension) {
            return Err(IngestError::FileValidation(format!(
                "File extension '{}' is not allowed (allowed: {})",
                extension,
                self.allowed_extensions.join(", ")
            )));
        }

        Ok(metadata.len())
    }
}
