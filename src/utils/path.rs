//! Path utilities for traversal-safe handling

use std::path::{Component, Path, PathBuf};

/// Markers that are never legitimate in an upload path
pub const TRAVERSAL_MARKERS: [&str; 3] = ["../", "~", "$"];

/// Resolve `.` and `..` without touching the filesystem.
///
/// `..` at the root stays at the root, matching how the kernel resolves it.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let stacked = normalized.components().next_back() == Some(Component::ParentDir);
                if stacked || (!normalized.pop() && !path.is_absolute()) {
                    normalized.push("..");
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// First traversal marker found in the literal path, if any
pub fn find_traversal_marker(path: &Path) -> Option<&'static str> {
    let text = path.to_string_lossy();
    TRAVERSAL_MARKERS
        .iter()
        .copied()
        .find(|marker| text.contains(marker))
        .or_else(|| {
            // A trailing ".." has no slash after it
            if path.components().any(|c| c == Component::ParentDir) {
                Some("../")
            } else {
                None
            }
        })
}

/// Lowercased extension of `path`
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Replace anything outside `[A-Za-z0-9._-]` so a name is safe to embed in a path
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}
