// Adapters - External system implementations

pub mod credentials;
#[cfg(feature = "ffmpeg")]
pub mod video_libav;
pub mod video_stub;

// Re-export adapters
pub use credentials::{EnvCredentials, StaticCredentials};
#[cfg(feature = "ffmpeg")]
pub use video_libav::{LibavVideoSource, LibavVideoSourceFactory};
pub use video_stub::{StubVideo, StubVideoSource, StubVideoSourceFactory};
