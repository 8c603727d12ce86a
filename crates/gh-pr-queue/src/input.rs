//! Discovered-PR input
//!
//! The caller passes every bot PR found for the run as one JSON array; each
//! invocation keeps only the entries of its own repository.

use crate::error::InputError;
use crate::models::PrQueueItem;
use gh_client::RepoSlug;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct DiscoveredPr {
    repo: String,
    #[serde(alias = "pr_number")]
    number: u64,
    #[serde(default, alias = "pr_title")]
    title: String,
    #[serde(alias = "pr_author")]
    author: Author,
}

/// Authors come either as a plain login or as a `{ "login": .. }` object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Author {
    Login(String),
    User { login: String },
}

impl Author {
    fn into_login(self) -> String {
        match self {
            Author::Login(login) | Author::User { login } => login,
        }
    }
}

/// Parse the discovered PR list and keep `repo`'s entries in order
///
/// Entries for other repositories are skipped without validation; a
/// malformed entry for `repo` is an error. Duplicate PR numbers collapse to
/// their first occurrence.
pub fn parse_discovered_prs(json: &str, repo: &RepoSlug) -> Result<Vec<PrQueueItem>, InputError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let entries = value.as_array().ok_or(InputError::NotAnArray)?;

    let wanted = repo.to_string();
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let entry_repo = entry.get("repo").and_then(|r| r.as_str());
        match entry_repo {
            Some(r) if r == wanted => {}
            Some(_) => continue,
            None => {
                return Err(InputError::Entry {
                    index,
                    reason: "missing 'repo'".to_string(),
                });
            }
        }

        let pr = DiscoveredPr::deserialize(entry).map_err(|e| InputError::Entry {
            index,
            reason: e.to_string(),
        })?;

        if !seen.insert(pr.number) {
            log::debug!("[{}] Skipping duplicate PR #{}", repo, pr.number);
            continue;
        }

        debug_assert_eq!(pr.repo, wanted);
        items.push(PrQueueItem::new(
            repo.clone(),
            pr.number,
            pr.title,
            pr.author.into_login(),
        ));
    }

    Ok(items)
}

/// Read the PR list from a file, `-` meaning stdin
pub fn read_prs_file(path: &Path) -> Result<String, InputError> {
    let read = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())
    } else {
        std::fs::read_to_string(path)
    };
    read.map_err(|source| InputError::Read {
        path: path.display().to_string(),
        source,
    })
}
