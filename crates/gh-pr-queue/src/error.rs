//! Typed errors the orchestrator branches on
//!
//! Everything else travels as `anyhow::Error` with context attached.

use gh_client::RepoSlug;
use thiserror::Error;

/// Blob store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional write or delete found a different generation
    #[error("precondition failed for '{key}'")]
    PreconditionFailed { key: String },

    #[error("invalid store key '{0}'")]
    InvalidKey(String),

    #[error("I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Queue state failures
#[derive(Debug, Error)]
pub enum StateError {
    /// A shard could not be decoded or violates a queue invariant
    #[error("corrupt state document '{key}': {reason}")]
    Corrupt {
        key: String,
        repo: Option<RepoSlug>,
        reason: String,
    },

    #[error("queue state invariant violated: {0}")]
    Invariant(String),

    /// Another invocation wrote the same repository shard since it was read
    #[error("state for {repo} was modified concurrently")]
    Conflict { repo: RepoSlug },

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        StateError::Store(err)
    }
}

/// Malformed discovered-PR input
#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid PR list JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("PR list must be a JSON array")]
    NotAnArray,

    #[error("PR entry {index}: {reason}")]
    Entry { index: usize, reason: String },

    #[error("failed to read PR list from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
