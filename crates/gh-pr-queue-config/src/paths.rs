//! Data directory paths
//!
//! Uses XDG directories via `dirs` crate with a temp-dir fallback.
//!
//! Platform-specific locations:
//! - Linux: `~/.cache/gh-pr-queue/`
//! - macOS: `~/Library/Caches/gh-pr-queue/`
//! - Windows: `%LOCALAPPDATA%\gh-pr-queue\`

use std::path::PathBuf;

const APP_NAME: &str = "gh-pr-queue";

/// Get the application cache directory, without creating it
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Default directory for the file-backed queue state
pub fn default_state_dir() -> PathBuf {
    cache_dir().join("state")
}
