//! Config file discovery

use std::path::PathBuf;

pub const CONFIG_FILE: &str = ".gh-pr-queue.toml";

/// Candidate locations, most specific first: the working directory, then home
pub fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(CONFIG_FILE)];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(CONFIG_FILE));
    }
    candidates
}

/// Path and content of the first readable config file
pub fn load_config_file() -> Option<(PathBuf, String)> {
    config_candidates().into_iter().find_map(|path| {
        let content = std::fs::read_to_string(&path).ok()?;
        log::debug!("Found config file {}", path.display());
        Some((path, content))
    })
}
