// Stub video source adapter - Deterministic frames for tests and dry runs

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::domain::errors::*;
use crate::ports::*;

/// Description of the synthetic video a stub source plays back
#[derive(Debug, Clone)]
pub struct StubVideo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
    pub codec: String,
    /// Frame indices that report a different size, to simulate corrupt streams
    pub resized_frames: HashMap<u64, (u32, u32)>,
    /// Reads fail once this many frames have been returned
    pub fail_after: Option<u64>,
    pub openable: bool,
}

impl Default for StubVideo {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30.0,
            frame_count: 300,
            codec: "avc1".to_string(),
            resized_frames: HashMap::new(),
            fail_after: None,
            openable: true,
        }
    }
}

impl StubVideo {
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_timing(mut self, fps: f64, frame_count: u64) -> Self {
        self.fps = fps;
        self.frame_count = frame_count;
        self
    }

    pub fn with_codec(mut self, codec: &str) -> Self {
        self.codec = codec.to_string();
        self
    }

    pub fn with_resized_frame(mut self, index: u64, width: u32, height: u32) -> Self {
        self.resized_frames.insert(index, (width, height));
        self
    }

    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn unopenable(mut self) -> Self {
        self.openable = false;
        self
    }
}

/// VideoSource that plays back a `StubVideo`
pub struct StubVideoSource {
    video: StubVideo,
    position: u64,
    released: bool,
}

impl StubVideoSource {
    pub fn new(video: StubVideo) -> Self {
        Self {
            video,
            position: 0,
            released: false,
        }
    }
}

impl VideoSource for StubVideoSource {
    fn is_open(&self) -> bool {
        self.video.openable && !self.released
    }

    fn get(&self, property: VideoProperty) -> f64 {
        if !self.is_open() {
            return 0.0;
        }
        match property {
            VideoProperty::FrameWidth => self.video.width as f64,
            VideoProperty::FrameHeight => self.video.height as f64,
            VideoProperty::Fps => self.video.fps,
            VideoProperty::FrameCount => self.video.frame_count as f64,
            VideoProperty::FourCc => fourcc_to_value(&self.video.codec),
        }
    }

    fn read(&mut self) -> Option<Frame> {
        if !self.is_open() || self.position >= self.video.frame_count {
            return None;
        }
        if let Some(limit) = self.video.fail_after {
            if self.position >= limit {
                return None;
            }
        }

        let (width, height) = self
            .video
            .resized_frames
            .get(&self.position)
            .copied()
            .unwrap_or((self.video.width, self.video.height));
        let shade = (self.position % 256) as u8;
        self.position += 1;

        Some(Frame::new(width, height, vec![shade; 16]))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Factory that hands out stub sources, optionally per file name
#[derive(Clone, Default)]
pub struct StubVideoSourceFactory {
    default_video: StubVideo,
    by_name: Arc<HashMap<String, StubVideo>>,
}

impl StubVideoSourceFactory {
    pub fn new(default_video: StubVideo) -> Self {
        Self {
            default_video,
            by_name: Arc::new(HashMap::new()),
        }
    }

    /// Use `video` for files whose name equals `file_name`
    pub fn with_video_for(mut self, file_name: &str, video: StubVideo) -> Self {
        let mut by_name = (*self.by_name).clone();
        by_name.insert(file_name.to_string(), video);
        self.by_name = Arc::new(by_name);
        self
    }
}

impl VideoSourceFactory for StubVideoSourceFactory {
    fn open(&self, path: &Path) -> IngestResult<Box<dyn VideoSource>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let video = self
            .by_name
            .get(&name)
            .cloned()
            .unwrap_or_else(|| self.default_video.clone());
        Ok(Box::new(StubVideoSource::new(video)))
    }
}
