//! Blob storage for queue state
//!
//! Stores are flat key/value namespaces with `/`-separated keys. Every
//! stored value carries an opaque generation; writes can be made
//! conditional on it, which is what keeps concurrent invocations from
//! overwriting each other.

pub mod file;
pub mod github;
pub mod memory;

use crate::error::StoreError;
use async_trait::async_trait;

pub use file::FileBlobStore;
pub use github::GitHubContentsStore;
pub use memory::MemoryBlobStore;

/// Opaque version token of a stored value
pub type Generation = String;

/// A stored value together with its generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub generation: Generation,
}

/// Precondition of a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Unconditional
    Any,
    /// The key must not exist yet
    DoesNotExist,
    /// The key must still hold this generation
    GenerationMatch(Generation),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError>;

    /// Write `data`; fails with `StoreError::PreconditionFailed` if the
    /// condition does not hold. Returns the new generation.
    async fn put(
        &self,
        key: &str,
        data: &[u8],
        condition: WriteCondition,
    ) -> Result<Generation, StoreError>;

    /// Delete a key; deleting a missing key succeeds
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Reject keys that could escape the store's namespace
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && !key.ends_with('/')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
        && !key.contains('\\');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
