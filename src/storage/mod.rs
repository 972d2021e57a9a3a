//! Filesystem layout and quarantine

pub mod directory;
pub mod quarantine;

pub use directory::DirectoryManager;
pub use quarantine::{QuarantineEntry, QuarantineManager};
