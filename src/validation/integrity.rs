//! Format and metadata integrity checks over a pluggable video source

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ValidationSettings;
use crate::domain::errors::{IngestError, IngestResult};
use crate::domain::model::VideoMetadata;
use crate::ports::{value_to_fourcc, VideoProperty, VideoSource, VideoSourceFactory};
use crate::utils::path::extension_of;
use crate::validation::mime::{expected_extensions, sniff_file};

/// Validates that a file really is the video it claims to be
pub struct IntegrityChecker {
    sources: Arc<dyn VideoSourceFactory>,
    min_scene_length: f64,
    max_scenes_per_video: u64,
    frame_sample_count: usize,
    test_mode: bool,
}

impl IntegrityChecker {
    pub fn new(
        sources: Arc<dyn VideoSourceFactory>,
        settings: &ValidationSettings,
        test_mode: bool,
    ) -> Self {
        Self {
            sources,
            min_scene_length: settings.min_scene_length,
            max_scenes_per_video: settings.max_scenes_per_video,
            frame_sample_count: settings.frame_sample_count,
            test_mode,
        }
    }

    /// Metadata returned in test mode without touching the file
    pub fn test_metadata() -> VideoMetadata {
        VideoMetadata {
            duration: 60.0,
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: "avc1".to_string(),
            total_frames: 1800,
        }
    }

    /// Format check, metadata extraction and validation, then optional sampling
    pub fn check_video(&self, path: &Path) -> IngestResult<VideoMetadata> {
        if self.test_mode {
            return Ok(Self::test_metadata());
        }

        self.validate_format(path)?;
        let metadata = self.extract_metadata(path)?;
        self.validate_metadata(&metadata)?;

        if self.frame_sample_count > 0 {
            self.validate_frames(path, self.frame_sample_count)?;
        }

        info!(
            path = %path.display(),
            duration = metadata.duration,
            width = metadata.width,
            height = metadata.height,
            codec = %metadata.codec,
            "Video integrity verified"
        );
        Ok(metadata)
    }

    /// Sniff the content type and require a matching extension
    pub fn validate_format(&self, path: &Path) -> IngestResult<&'static str> {
        let mime = sniff_file(path).map_err(|e| {
            IngestError::VideoFormat(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let expected = expected_extensions(mime);
        if expected.is_empty() {
            return Err(IngestError::VideoFormat(format!(
                "Unsupported content type {} for {}",
                mime,
                path.display()
            )));
        }

        let extension = extension_of(path).unwrap_or_default();
        if !expected.contains(&extension.as_str()) {
            return Err(IngestError::VideoFormat(format!(
                "Extension '{}' does not match content type {} (expected {})",
                extension,
                mime,
                expected.join(", ")
            )));
        }

        debug!("Detected {} for {}", mime, path.display());
        Ok(mime)
    }

    /// Read the stream properties; the source is always released
    pub fn extract_metadata(&self, path: &Path) -> IngestResult<VideoMetadata> {
        let mut source = self.open(path)?;
        let metadata = read_properties(source.as_ref());
        source.release();
        Ok(metadata)
    }

    pub fn validate_metadata(&self, metadata: &VideoMetadata) -> IngestResult<()> {
        if metadata.duration <= 0.0 {
            return Err(IngestError::VideoIntegrity(format!(
                "Invalid duration: {}",
                metadata.duration
            )));
        }
        if metadata.width == 0 || metadata.height == 0 {
            return Err(IngestError::VideoIntegrity(format!(
                "Invalid dimensions: {}x{}",
                metadata.width, metadata.height
            )));
        }
        if metadata.fps <= 0.0 {
            return Err(IngestError::VideoIntegrity(format!(
                "Invalid frame rate: {}",
                metadata.fps
            )));
        }
        if metadata.total_frames == 0 {
            return Err(IngestError::VideoIntegrity(
                "Video contains no frames".to_string(),
            ));
        }
        if metadata.codec.is_empty() {
            return Err(IngestError::VideoIntegrity(
                "Codec could not be determined".to_string(),
            ));
        }

        if metadata.duration < self.min_scene_length {
            return Err(IngestError::VideoIntegrity(format!(
                "Video duration {:.2}s is shorter than minimum scene length {:.2}s",
                metadata.duration, self.min_scene_length
            )));
        }

        // Coarse admission heuristic, not a real scene count
        let estimated_scenes = metadata.duration / self.min_scene_length;
        if estimated_scenes > self.max_scenes_per_video as f64 {
            return Err(IngestError::VideoIntegrity(format!(
                "Estimated scene count {:.0} exceeds maximum {}",
                estimated_scenes, self.max_scenes_per_video
            )));
        }
        Ok(())
    }

    /// Read forward through the stream and compare `sample_count` evenly
    /// spaced frames against the first one
    pub fn validate_frames(&self, path: &Path, sample_count: usize) -> IngestResult<()> {
        if self.test_mode || sample_count == 0 {
            return Ok(());
        }

        let mut source = self.open(path)?;
        let result = sample_frames(source.as_mut(), sample_count);
        source.release();
        result
    }

    /// Bits per second over the whole file
    pub fn estimate_bitrate(&self, path: &Path) -> IngestResult<f64> {
        let size = std::fs::metadata(path)
            .map_err(|e| {
                IngestError::VideoIntegrity(format!("Cannot stat {}: {}", path.display(), e))
            })?
            .len();
        let metadata = if self.test_mode {
            Self::test_metadata()
        } else {
            self.extract_metadata(path)?
        };

        if metadata.duration <= 0.0 {
            return Err(IngestError::VideoIntegrity(format!(
                "Cannot estimate bitrate of {}: unknown duration",
                path.display()
            )));
        }
        Ok(size as f64 * 8.0 / metadata.duration)
    }

    fn open(&self, path: &Path) -> IngestResult<Box<dyn VideoSource>> {
        let mut source = self.sources.open(path)?;
        if !source.is_open() {
            source.release();
            return Err(IngestError::VideoIntegrity(format!(
                "Failed to open video {}",
                path.display()
            )));
        }
        Ok(source)
    }
}

fn read_properties(source: &dyn VideoSource) -> VideoMetadata {
    let fps = source.get(VideoProperty::Fps);
    let frame_count = source.get(VideoProperty::FrameCount).max(0.0);
    let duration = if fps > 0.0 { frame_count / fps } else { 0.0 };

    VideoMetadata {
        duration,
        width: source.get(VideoProperty::FrameWidth).max(0.0) as u32,
        height: source.get(VideoProperty::FrameHeight).max(0.0) as u32,
        fps,
        codec: value_to_fourcc(source.get(VideoProperty::FourCc)),
        total_frames: frame_count as u64,
    }
}

fn sample_frames(source: &mut dyn VideoSource, sample_count: usize) -> IngestResult<()> {
    let total = source.get(VideoProperty::FrameCount).max(0.0) as u64;
    if total == 0 {
        return Err(IngestError::VideoIntegrity(
            "Cannot sample frames: frame count unknown".to_string(),
        ));
    }

    let mut expected: Option<(u32, u32)> = None;
    let mut index = 0u64;
    for target in sample_targets(total, sample_count) {
        let frame = loop {
            let frame = source.read().ok_or_else(|| {
                IngestError::VideoIntegrity(format!("Failed to read frame {}", index))
            })?;
            index += 1;
            if index > target {
                break frame;
            }
        };

        match expected {
            None => expected = Some((frame.width, frame.height)),
            Some((width, height)) if (frame.width, frame.height) != (width, height) => {
                return Err(IngestError::VideoIntegrity(format!(
                    "Frame {} is {}x{}, expected {}x{}",
                    target, frame.width, frame.height, width, height
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Evenly spaced frame indices in `0..total`, ascending and unique
fn sample_targets(total: u64, sample_count: usize) -> Vec<u64> {
    let samples = (sample_count as u64).min(total);
    let mut targets: Vec<u64> = (0..samples)
        .map(|i| (u128::from(i) * u128::from(total) / u128::from(samples)) as u64)
        .collect();
    targets.dedup();
    targets
}
