//! vidingest library
//!
//! Ingestion pipeline for untrusted video uploads: validate, secure or
//! quarantine each file, then hand it to a remote analysis service and
//! persist the result.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod ports;
pub mod remote;
pub mod storage;
pub mod utils;
pub mod validation;

// Re-export commonly used types
pub use config::Settings;
pub use domain::errors::{IngestError, IngestResult};
pub use domain::model::{ProcessingStatus, Video, VideoMetadata};
pub use engine::{ProgressTracker, UploadProcessor};
