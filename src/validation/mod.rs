//! Validation of untrusted uploads
//!
//! Cheap pre-flight checks first ([`FileValidator`]), then security
//! ([`SecurityValidator`]), then content integrity ([`IntegrityChecker`]).

pub mod file;
pub mod integrity;
pub mod mime;
pub mod security;

pub use file::FileValidator;
pub use integrity::IntegrityChecker;
pub use security::SecurityValidator;
