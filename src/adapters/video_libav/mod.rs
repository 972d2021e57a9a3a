// LibAV video source adapter - Decoder-backed frame access using ffmpeg-next

use std::path::Path;

use ffmpeg_next as ffmpeg;
use tracing::{debug, warn};

use crate::domain::errors::*;
use crate::ports::*;

/// VideoSource backed by an FFmpeg demuxer and decoder
pub struct LibavVideoSource {
    input: Option<ffmpeg::format::context::Input>,
    decoder: Option<ffmpeg::decoder::Video>,
    stream_index: usize,
    width: u32,
    height: u32,
    fps: f64,
    frame_count: f64,
    fourcc: f64,
    eof_sent: bool,
}

impl LibavVideoSource {
    /// Open the best video stream of `path`
    pub fn open(path: &Path) -> IngestResult<Self> {
        ffmpeg::init().map_err(|e| {
            IngestError::VideoIntegrity(format!("Failed to initialize FFmpeg: {}", e))
        })?;

        let input = ffmpeg::format::input(&path).map_err(|e| {
            IngestError::VideoIntegrity(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| IngestError::VideoIntegrity("No video stream found".to_string()))?;
        let stream_index = stream.index();

        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        // Containers without an index report 0 frames; estimate from duration
        let frame_count = if stream.frames() > 0 {
            stream.frames() as f64
        } else {
            let time_base = stream.time_base();
            let seconds = if time_base.denominator() != 0 && stream.duration() > 0 {
                stream.duration() as f64 * time_base.numerator() as f64
                    / time_base.denominator() as f64
            } else {
                0.0
            };
            (seconds * fps).round()
        };

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| IngestError::VideoIntegrity(format!("Unsupported codec: {}", e)))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| IngestError::VideoIntegrity(format!("Failed to open decoder: {}", e)))?;

        let codec_name: String = decoder.id().name().chars().take(4).collect();
        debug!(
            "Opened {} stream {}: {}x{} @ {:.2} fps, {} frames",
            codec_name,
            stream_index,
            decoder.width(),
            decoder.height(),
            fps,
            frame_count
        );

        Ok(Self {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            frame_count,
            fourcc: fourcc_to_value(&codec_name),
            stream_index,
            input: Some(input),
            decoder: Some(decoder),
            eof_sent: false,
        })
    }
}

impl VideoSource for LibavVideoSource {
    fn is_open(&self) -> bool {
        self.input.is_some() && self.decoder.is_some()
    }

    fn get(&self, property: VideoProperty) -> f64 {
        if !self.is_open() {
            return 0.0;
        }
        match property {
            VideoProperty::FrameWidth => self.width as f64,
            VideoProperty::FrameHeight => self.height as f64,
            VideoProperty::Fps => self.fps,
            VideoProperty::FrameCount => self.frame_count,
            VideoProperty::FourCc => self.fourcc,
        }
    }

    fn read(&mut self) -> Option<Frame> {
        let (input, decoder) = match (self.input.as_mut(), self.decoder.as_mut()) {
            (Some(input), Some(decoder)) => (input, decoder),
            _ => return None,
        };

        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if decoder.receive_frame(&mut decoded).is_ok() {
                return Some(Frame::new(
                    decoded.width(),
                    decoded.height(),
                    decoded.data(0).to_vec(),
                ));
            }
            if self.eof_sent {
                return None;
            }

            let mut packets = input.packets();
            let next = packets.find(|(stream, _)| stream.index() == self.stream_index);
            match next {
                Some((_, packet)) => {
                    if let Err(e) = decoder.send_packet(&packet) {
                        warn!("Failed to decode packet: {}", e);
                        return None;
                    }
                }
                None => {
                    if decoder.send_eof().is_err() {
                        return None;
                    }
                    self.eof_sent = true;
                }
            }
        }
    }

    fn release(&mut self) {
        self.decoder = None;
        self.input = None;
    }
}

/// Factory producing `LibavVideoSource`s
#[derive(Debug, Clone, Default)]
pub struct LibavVideoSourceFactory;

impl LibavVideoSourceFactory {
    pub fn new() -> Self {
        Self
    }
}

impl VideoSourceFactory for LibavVideoSourceFactory {
    fn open(&self, path: &Path) -> IngestResult<Box<dyn VideoSource>> {
        Ok(Box::new(LibavVideoSource::open(path)?))
    }
}
