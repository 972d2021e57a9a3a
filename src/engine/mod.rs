//! Upload pipeline engine
//!
//! [`UploadProcessor`] composes validation, storage, quarantine and the
//! remote client; [`ProgressTracker`] and [`UploadContext`] follow one
//! upload from start to finish.

pub mod context;
pub mod processor;
pub mod progress;

pub use context::{ScopedPath, UploadContext};
pub use processor::UploadProcessor;
pub use progress::{CallbackId, LoggingProgressCallback, ProgressCallback, ProgressTracker};
