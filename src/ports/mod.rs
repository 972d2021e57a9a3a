// Ports - Interface definitions (contracts)

use crate::domain::errors::*;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Properties readable from an open video source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoProperty {
    FrameWidth,
    FrameHeight,
    Fps,
    FrameCount,
    /// Four-character codec code packed little-endian into the value
    FourCc,
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }
}

/// Port for frame-level access to a video file
pub trait VideoSource: Send {
    /// Whether the underlying file was opened successfully
    fn is_open(&self) -> bool;

    /// Read a numeric property; 0.0 when unknown
    fn get(&self, property: VideoProperty) -> f64;

    /// Decode the next frame; `None` at end of stream or on read failure
    fn read(&mut self) -> Option<Frame>;

    /// Release decoder resources; further reads return `None`
    fn release(&mut self);
}

/// Port for opening video sources
pub trait VideoSourceFactory: Send + Sync {
    fn open(&self, path: &Path) -> IngestResult<Box<dyn VideoSource>>;
}

/// Pack a four-character code the way capture backends report it
pub fn fourcc_to_value(code: &str) -> f64 {
    let mut packed: u32 = 0;
    for (i, byte) in code.bytes().take(4).enumerate() {
        packed |= (byte as u32) << (8 * i);
    }
    packed as f64
}

/// Decode a packed four-character code, dropping NULs and padding
pub fn value_to_fourcc(value: f64) -> String {
    let packed = value as u32;
    (0..4)
        .map(|i| ((packed >> (8 * i)) & 0xFF) as u8)
        .filter(|b| *b != 0)
        .map(char::from)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Port for API key lookup by service name
pub trait CredentialsProvider: Send + Sync {
    fn api_key(&self, service: &str) -> Option<String>;
}

/// Port for suspending between retries and polls
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}
