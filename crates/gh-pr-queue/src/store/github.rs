//! Blob store on a branch of a GitHub repository
//!
//! Keys are file paths on the branch and the blob SHA is the generation, so
//! the contents API's own SHA precondition gives conditional writes. The
//! branch must already exist.

use super::{validate_key, Blob, BlobStore, Generation, WriteCondition};
use crate::error::StoreError;
use async_trait::async_trait;
use gh_client::{GitHubClient, PutOutcome, RepoSlug};
use std::sync::Arc;

pub struct GitHubContentsStore {
    client: Arc<dyn GitHubClient>,
    repo: RepoSlug,
    branch: String,
}

impl GitHubContentsStore {
    pub fn new(client: Arc<dyn GitHubClient>, repo: RepoSlug, branch: impl Into<String>) -> Self {
        Self {
            client,
            repo,
            branch: branch.into(),
        }
    }

    fn precondition_failed(key: &str) -> StoreError {
        StoreError::PreconditionFailed {
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for GitHubContentsStore {
    async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError> {
        validate_key(key)?;
        let file = self.client.get_file(&self.repo, &self.branch, key).await?;
        Ok(file.map(|f| Blob {
            data: f.content,
            generation: f.sha,
        }))
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        condition: WriteCondition,
    ) -> Result<Generation, StoreError> {
        validate_key(key)?;

        let expected = match condition {
            WriteCondition::DoesNotExist => None,
            WriteCondition::GenerationMatch(sha) => Some(sha),
            // The API always wants the current SHA for an update
            WriteCondition::Any => self
                .client
                .get_file(&self.repo, &self.branch, key)
                .await?
                .map(|f| f.sha),
        };

        let message = format!("Update queue state {}", key);
        let outcome = self
            .client
            .put_file(
                &self.repo,
                &self.branch,
                key,
                data,
                &message,
                expected.as_deref(),
            )
            .await?;

        match outcome {
            PutOutcome::Written(sha) => Ok(sha),
            PutOutcome::Conflict => Err(Self::precondition_failed(key)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let Some(file) = self.client.get_file(&self.repo, &self.branch, key).await? else {
            return Ok(());
        };
        let message = format!("Remove queue state {}", key);
        self.client
            .delete_file(&self.repo, &self.branch, key, &file.sha, &message)
            .await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // Walk from the deepest directory fully contained in the prefix
        let start = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };

        let mut keys = Vec::new();
        let mut pending = vec![start.to_string()];
        while let Some(dir) = pending.pop() {
            let entries = self
                .client
                .list_directory(&self.repo, &self.branch, &dir)
                .await?;
            for entry in entries {
                if entry.is_dir {
                    pending.push(entry.path);
                } else if entry.path.starts_with(prefix) {
                    keys.push(entry.path);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.repo, self.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockGitHubClient;
    use pretty_assertions::assert_eq;

    fn store(client: Arc<MockGitHubClient>) -> GitHubContentsStore {
        GitHubContentsStore::new(client, "acme/bot".parse().unwrap(), "queue-state")
    }

    #[tokio::test]
    async fn test_sha_is_the_generation() {
        let client = Arc::new(MockGitHubClient::new());
        let store = store(client.clone());

        let g1 = store
            .put("s/repos/o/r.json", b"one", WriteCondition::DoesNotExist)
            .await
            .unwrap();
        let blob = store.get("s/repos/o/r.json").await.unwrap().unwrap();
        assert_eq!(blob.generation, g1);

        let conflict = store
            .put("s/repos/o/r.json", b"two", WriteCondition::DoesNotExist)
            .await;
        assert!(matches!(conflict, Err(StoreError::PreconditionFailed { .. })));

        let g2 = store
            .put("s/repos/o/r.json", b"two", WriteCondition::Any)
            .await
            .unwrap();
        assert_ne!(g1, g2);

        let stale = store
            .put("s/repos/o/r.json", b"three", WriteCondition::GenerationMatch(g1))
            .await;
        assert!(matches!(stale, Err(StoreError::PreconditionFailed { .. })));
    }

    #[tokio::test]
    async fn test_list_walks_directories() {
        let client = Arc::new(MockGitHubClient::new());
        let store = store(client.clone());

        for key in ["s/repos/o/a.json", "s/repos/p/b.json", "t/c.json"] {
            store.put(key, b"{}", WriteCondition::Any).await.unwrap();
        }

        assert_eq!(
            store.list("s/repos/").await.unwrap(),
            vec!["s/repos/o/a.json", "s/repos/p/b.json"]
        );

        store.delete("s/repos/o/a.json").await.unwrap();
        store.delete("s/repos/o/a.json").await.unwrap();
        assert_eq!(store.list("s/").await.unwrap(), vec!["s/repos/p/b.json"]);
    }
}
