//! Configuration loading and hierarchy management
//!
//! Precedence: environment > TOML file > defaults. Only the binary loads
//! configuration; library components take the plain settings structs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::domain::errors::{IngestError, IngestResult};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "VIDINGEST";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub validation: ValidationSettings,
    pub remote: RemoteSettings,
    pub processing: ProcessingSettings,
    pub logging: LoggingSettings,
}

/// On-disk layout and permissions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub base_dir: PathBuf,
    pub dir_mode: u32,
    pub file_mode: u32,
    pub quarantine_mode: u32,
    /// Compute paths but never touch the filesystem
    pub test_mode: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data"),
            dir_mode: 0o755,
            file_mode: 0o644,
            quarantine_mode: 0o600,
            test_mode: false,
        }
    }
}

/// File, security and integrity validation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub max_file_size_mb: u64,
    pub allowed_extensions: Vec<String>,
    /// Shortest acceptable video, and the unit of the scene estimate (seconds)
    pub min_scene_length: f64,
    pub max_scenes_per_video: u64,
    /// Frames sampled for dimension consistency; 0 disables sampling
    pub frame_sample_count: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_file_size_mb: 2048,
            allowed_extensions: ["mp4", "mov", "avi", "mkv", "webm", "m4v"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            min_scene_length: 2.0,
            max_scenes_per_video: 500,
            frame_sample_count: 0,
        }
    }
}

/// Remote analysis service client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub base_url: String,
    /// Name passed to the credentials provider
    pub service_name: String,
    pub chunk_size: usize,
    /// Total attempts per request, including the first
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub task_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.example.com/v1".to_string(),
            service_name: "analysis".to_string(),
            chunk_size: 1024 * 1024,
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            poll_interval_ms: 5_000,
            task_timeout_secs: 3_600,
            request_timeout_secs: 60,
        }
    }
}

impl RemoteSettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// What the orchestrator asks the remote service to do
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub index_name: String,
    pub task_type: String,
    pub task_options: HashMap<String, serde_json::Value>,
    /// Where scoped temp files are created; defaults to `<base_dir>/temp`
    pub temp_dir: Option<PathBuf>,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            index_name: "default".to_string(),
            task_type: "scene_detection".to_string(),
            task_options: HashMap::new(),
            temp_dir: None,
        }
    }
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Load defaults, then `path` if given, then environment overrides
    pub fn load(path: Option<&Path>) -> IngestResult<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> IngestResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        info!("Loading configuration from: {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> IngestResult<Self> {
        toml::from_str(content)
            .map_err(|e| IngestError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Apply `VIDINGEST_*` overrides using `lookup` to read variables
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}_{}", ENV_PREFIX, name));
        let mut overrides = 0;

        if let Some(dir) = var("BASE_DIR") {
            self.storage.base_dir = PathBuf::from(dir);
            overrides += 1;
        }
        if let Some(url) = var("API_URL") {
            self.remote.base_url = url;
            overrides += 1;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
            overrides += 1;
        }
        if let Some(flag) = var("TEST_MODE") {
            self.storage.test_mode = matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes");
            overrides += 1;
        }

        if overrides > 0 {
            info!("Applied {} environment variable overrides", overrides);
        }
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> IngestResult<()> {
        if self.remote.chunk_size == 0 {
            return Err(IngestError::Config("chunk_size must be positive".to_string()));
        }
        if self.remote.max_retries == 0 {
            return Err(IngestError::Config(
                "max_retries must allow at least one attempt".to_string(),
            ));
        }
        if self.remote.max_backoff_ms < self.remote.initial_backoff_ms {
            return Err(IngestError::Config(
                "max_backoff_ms cannot be smaller than initial_backoff_ms".to_string(),
            ));
        }
        if self.validation.min_scene_length <= 0.0 {
            return Err(IngestError::Config(
                "min_scene_length must be positive".to_string(),
            ));
        }
        if self.validation.allowed_extensions.is_empty() {
            return Err(IngestError::Config(
                "allowed_extensions cannot be empty".to_string(),
            ));
        }
        for mode in [
            self.storage.dir_mode,
            self.storage.file_mode,
            self.storage.quarantine_mode,
        ] {
            if mode > 0o777 {
                return Err(IngestError::Config(format!(
                    "Invalid permission mode: {:o}",
                    mode
                )));
            }
        }
        Ok(())
    }

    /// Directory used for scoped temporary files
    pub fn temp_dir(&self) -> PathBuf {
        self.processing
            .temp_dir
            .clone()
            .unwrap_or_else(|| self.storage.base_dir.join("temp"))
    }
}
