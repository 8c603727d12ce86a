//! Durable checkpoint and resume of queue state
//!
//! Every repository queue lives in its own shard at
//! `<prefix>/repos/<owner>/<name>.json`, so invocations working on different
//! repositories never write the same key. Writes are conditional on the
//! generation last read or written for that key; a lost race surfaces as
//! [`StateError::Conflict`] instead of overwriting the other writer.

use crate::error::{StateError, StoreError};
use crate::models::{PrQueueItem, QueueState, RepoQueue};
use crate::store::{BlobStore, Generation, WriteCondition};
use chrono::{DateTime, Duration, Utc};
use gh_client::RepoSlug;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA_VERSION: u32 = 1;

/// On-disk document of one repository queue
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepoShard {
    schema_version: u32,
    workflow_run_id: String,
    timeout_at: DateTime<Utc>,
    repo: RepoSlug,
    queue: RepoQueue,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tracked {
    /// Generation last seen per key
    generations: HashMap<String, Generation>,
    /// When each repository was first saved as completed
    completed_at: HashMap<RepoSlug, DateTime<Utc>>,
}

pub struct StateManager {
    store: Arc<dyn BlobStore>,
    prefix: String,
    run_budget: Duration,
    tracked: Mutex<Tracked>,
}

impl StateManager {
    pub fn new(store: Arc<dyn BlobStore>, prefix: impl Into<String>, run_budget: Duration) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self {
            store,
            prefix,
            run_budget,
            tracked: Mutex::new(Tracked::default()),
        }
    }

    pub fn run_budget(&self) -> Duration {
        self.run_budget
    }

    pub fn describe(&self) -> String {
        format!("{} ({})", self.store.describe(), self.prefix)
    }

    fn shards_prefix(&self) -> String {
        format!("{}/repos/", self.prefix)
    }

    fn key_for(&self, repo: &RepoSlug) -> String {
        format!("{}{}/{}.json", self.shards_prefix(), repo.owner(), repo.name())
    }

    fn repo_for(&self, key: &str) -> Option<RepoSlug> {
        key.strip_prefix(&self.shards_prefix())?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    fn decode(&self, key: &str, data: &[u8]) -> Result<RepoShard, StateError> {
        let corrupt = |reason: String| StateError::Corrupt {
            key: key.to_string(),
            repo: self.repo_for(key),
            reason,
        };

        let shard: RepoShard = serde_json::from_slice(data).map_err(|e| corrupt(e.to_string()))?;
        if shard.schema_version != SCHEMA_VERSION {
            return Err(corrupt(format!(
                "unsupported schema version {}",
                shard.schema_version
            )));
        }
        if self.repo_for(key).as_ref() != Some(&shard.repo) {
            return Err(corrupt(format!("holds the queue of {}", shard.repo)));
        }
        shard
            .queue
            .validate(&shard.repo)
            .map_err(|e| corrupt(e.to_string()))?;
        if shard.completed_at.is_some() && !shard.queue.is_complete() {
            return Err(corrupt("marked completed but not drained".to_string()));
        }
        Ok(shard)
    }

    /// Assemble the state of the most recently active run
    ///
    /// Returns `None` when no readable shard exists. Shards left behind by
    /// other runs are ignored. A corrupt shard is skipped with a warning, so
    /// its repository has no queue in the result and the caller recreates
    /// it; every other repository keeps its progress. The generation of
    /// every shard is recorded, corrupt ones included, so a recreated queue
    /// can overwrite it.
    pub async fn load_state(&self) -> Result<Option<QueueState>, StateError> {
        let keys = self.store.list(&self.shards_prefix()).await?;
        let mut shards = Vec::with_capacity(keys.len());
        {
            let mut tracked = self.tracked.lock().await;
            for key in keys {
                let Some(blob) = self.store.get(&key).await? else {
                    continue;
                };
                tracked.generations.insert(key.clone(), blob.generation);
                shards.push((key, blob.data));
            }
        }

        let mut decoded = Vec::with_capacity(shards.len());
        for (key, data) in &shards {
            match self.decode(key, data) {
                Ok(shard) => decoded.push(shard),
                Err(e @ StateError::Corrupt { .. }) => warn!("Skipping queue shard: {}", e),
                Err(e) => return Err(e),
            }
        }

        let Some(latest) = decoded.iter().max_by_key(|s| s.updated_at) else {
            debug!("No queue state under {}", self.describe());
            return Ok(None);
        };
        let run_id = latest.workflow_run_id.clone();
        let timeout_at = latest.timeout_at;

        let (current, stale): (Vec<RepoShard>, Vec<RepoShard>) = decoded
            .into_iter()
            .partition(|s| s.workflow_run_id == run_id);
        if !stale.is_empty() {
            info!(
                "Ignoring {} queue shard(s) left by earlier runs",
                stale.len()
            );
        }

        let mut state = QueueState::new(run_id, timeout_at);
        let mut completed = Vec::new();
        {
            let mut tracked = self.tracked.lock().await;
            for shard in current {
                if let Some(at) = shard.completed_at {
                    tracked.completed_at.insert(shard.repo.clone(), at);
                    completed.push((at, shard.repo.clone()));
                }
                state.timeout_at = state.timeout_at.max(shard.timeout_at);
                state.insert_repo_queue(shard.repo, shard.queue);
            }
        }

        completed.sort();
        for (_, repo) in completed {
            state.mark_completed(&repo);
        }

        state.validate()?;
        debug!(
            "Loaded run {} with {} queue(s) from {}",
            state.workflow_run_id,
            state.repo_queues.len(),
            self.describe()
        );
        Ok(Some(state))
    }

    /// Persist every repository queue of `state`
    pub async fn save_state(&self, state: &QueueState) -> Result<(), StateError> {
        for repo in state.repo_queues.keys() {
            self.save_repo(state, repo).await?;
        }
        Ok(())
    }

    /// Persist the shard of `repo` only
    pub async fn save_repo(&self, state: &QueueState, repo: &RepoSlug) -> Result<(), StateError> {
        let queue = state
            .repo_queues
            .get(repo)
            .ok_or_else(|| StateError::Invariant(format!("{} has no queue to save", repo)))?;
        queue.validate(repo)?;

        let key = self.key_for(repo);
        let now = Utc::now();
        let mut tracked = self.tracked.lock().await;

        let completed_at = if state.is_completed(repo) {
            Some(*tracked.completed_at.entry(repo.clone()).or_insert(now))
        } else {
            tracked.completed_at.remove(repo);
            None
        };

        let shard = RepoShard {
            schema_version: SCHEMA_VERSION,
            workflow_run_id: state.workflow_run_id.clone(),
            timeout_at: state.timeout_at,
            repo: repo.clone(),
            queue: queue.clone(),
            completed_at,
            updated_at: now,
        };
        let data = serde_json::to_vec_pretty(&shard)?;

        let condition = match tracked.generations.get(&key) {
            Some(generation) => WriteCondition::GenerationMatch(generation.clone()),
            None => WriteCondition::DoesNotExist,
        };

        match self.store.put(&key, &data, condition).await {
            Ok(generation) => {
                debug!("[{}] Saved queue state (generation {})", repo, generation);
                tracked.generations.insert(key, generation);
                Ok(())
            }
            Err(StoreError::PreconditionFailed { .. }) => {
                warn!("[{}] Queue state was changed by another invocation", repo);
                Err(StateError::Conflict { repo: repo.clone() })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fresh state for `prs`, bucketed by repository in discovery order
    ///
    /// The deadline is now plus the run budget. Nothing is persisted.
    pub fn create_initial_state(
        &self,
        workflow_run_id: impl Into<String>,
        prs: Vec<PrQueueItem>,
    ) -> QueueState {
        let mut buckets: BTreeMap<RepoSlug, Vec<PrQueueItem>> = BTreeMap::new();
        for pr in prs {
            buckets.entry(pr.repo.clone()).or_default().push(pr);
        }

        let mut state = QueueState::new(workflow_run_id, Utc::now() + self.run_budget);
        for (repo, prs) in buckets {
            state.insert_repo_queue(repo, RepoQueue::new(prs));
        }
        state
    }

    /// Delete every shard under the prefix
    pub async fn clear_state(&self) -> Result<(), StateError> {
        let keys = self.store.list(&format!("{}/", self.prefix)).await?;
        let mut tracked = self.tracked.lock().await;
        for key in &keys {
            self.store.delete(key).await?;
            tracked.generations.remove(key);
        }
        tracked.completed_at.clear();
        info!("Cleared {} queue shard(s) from {}", keys.len(), self.describe());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrStatus;
    use crate::store::MemoryBlobStore;
    use pretty_assertions::assert_eq;

    fn slug(s: &str) -> RepoSlug {
        s.parse().unwrap()
    }

    fn item(repo: &str, number: u64) -> PrQueueItem {
        PrQueueItem::new(slug(repo), number, format!("Bump {}", number), "app/dependabot")
    }

    fn manager(store: Arc<dyn BlobStore>) -> StateManager {
        StateManager::new(store, "queue-state", Duration::minutes(350))
    }

    #[tokio::test]
    async fn test_load_without_state() {
        let manager = manager(Arc::new(MemoryBlobStore::new()));
        assert!(manager.load_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initial_state_buckets_by_repo() {
        let manager = manager(Arc::new(MemoryBlobStore::new()));
        let state = manager.create_initial_state(
            "run-1",
            vec![item("o/a", 2), item("o/b", 5), item("o/a", 1)],
        );

        let numbers: Vec<u64> = state.repo_queues[&slug("o/a")]
            .prs()
            .iter()
            .map(|pr| pr.pr_number)
            .collect();
        assert_eq!(numbers, vec![2, 1]);
        assert_eq!(state.repo_queues[&slug("o/b")].len(), 1);
        assert!(state.completed_repos.is_empty());
        assert!(state.time_remaining(Utc::now()) > Duration::minutes(349));
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let manager = manager(store.clone());

        let mut state = manager.create_initial_state(
            "run-1",
            vec![item("o/a", 1), item("o/a", 2), item("o/b", 3)],
        );
        let b = state.repo_queues.get_mut(&slug("o/b")).unwrap();
        b.current_pr_mut().unwrap().set_status(PrStatus::Done, "merged");
        b.advance();
        assert!(state.mark_completed(&slug("o/b")));
        let a = state.repo_queues.get_mut(&slug("o/a")).unwrap();
        a.current_pr_mut().unwrap().fix_sha = Some("abc".to_string());
        a.advance();

        manager.save_state(&state).await.unwrap();

        let loaded = StateManager::new(store, "queue-state", Duration::minutes(350))
            .load_state()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_concurrent_saves_for_different_repos_both_survive() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let first = manager(store.clone());
        let second = manager(store.clone());

        let shared = first.create_initial_state("run-1", vec![item("o/a", 1), item("o/b", 2)]);
        first.save_state(&shared).await.unwrap();
        first.load_state().await.unwrap();
        second.load_state().await.unwrap();

        let mut a_view = shared.clone();
        a_view.repo_queues.get_mut(&slug("o/a")).unwrap().advance();
        a_view.mark_completed(&slug("o/a"));
        let mut b_view = shared.clone();
        b_view.repo_queues.get_mut(&slug("o/b")).unwrap().advance();

        let (a, b) = (slug("o/a"), slug("o/b"));
        let (ra, rb) = tokio::join!(first.save_repo(&a_view, &a), second.save_repo(&b_view, &b));
        ra.unwrap();
        rb.unwrap();

        let loaded = manager(store).load_state().await.unwrap().unwrap();
        assert!(loaded.repo_queues[&slug("o/a")].is_complete());
        assert!(loaded.repo_queues[&slug("o/b")].is_complete());
        assert_eq!(loaded.completed_repos, vec![slug("o/a")]);
    }

    #[tokio::test]
    async fn test_same_repo_race_is_detected() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let first = manager(store.clone());
        let second = manager(store.clone());

        let state = first.create_initial_state("run-1", vec![item("o/a", 1), item("o/a", 2)]);
        first.save_state(&state).await.unwrap();
        second.load_state().await.unwrap();
        first.load_state().await.unwrap();

        let mut ahead = state.clone();
        ahead.repo_queues.get_mut(&slug("o/a")).unwrap().advance();
        first.save_repo(&ahead, &slug("o/a")).await.unwrap();

        let result = second.save_repo(&state, &slug("o/a")).await;
        assert!(matches!(result, Err(StateError::Conflict { .. })));

        let loaded = manager(store).load_state().await.unwrap().unwrap();
        assert_eq!(loaded.repo_queues[&slug("o/a")].current_index(), 1);
    }

    #[tokio::test]
    async fn test_unread_existing_shard_is_not_overwritten() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let first = manager(store.clone());
        let state = first.create_initial_state("run-1", vec![item("o/a", 1)]);
        first.save_state(&state).await.unwrap();

        let blind = manager(store);
        let result = blind.save_state(&state).await;
        assert!(matches!(result, Err(StateError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_latest_run_wins_over_stale_shards() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let old = manager(store.clone());
        let old_state = old.create_initial_state("run-1", vec![item("o/a", 1), item("o/b", 2)]);
        old.save_state(&old_state).await.unwrap();

        let new = manager(store.clone());
        new.load_state().await.unwrap();
        let new_state = new.create_initial_state("run-2", vec![item("o/a", 7)]);
        new.save_repo(&new_state, &slug("o/a")).await.unwrap();

        let loaded = manager(store).load_state().await.unwrap().unwrap();
        assert_eq!(loaded.workflow_run_id, "run-2");
        assert_eq!(loaded.repo_queues.len(), 1);
        assert_eq!(loaded.repo_queues[&slug("o/a")].prs()[0].pr_number, 7);
    }

    #[tokio::test]
    async fn test_corrupt_shard_is_skipped_and_overwritable() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        store
            .put(
                "queue-state/repos/o/a.json",
                br#"{"schema_version":1,"status":"SNOOZED"}"#,
                WriteCondition::Any,
            )
            .await
            .unwrap();

        let manager = manager(store.clone());
        assert!(manager.load_state().await.unwrap().is_none());

        let fresh = manager.create_initial_state("run-9", vec![item("o/a", 1)]);
        manager.save_repo(&fresh, &slug("o/a")).await.unwrap();
        assert_eq!(manager.load_state().await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_corrupt_shard_of_other_repo_keeps_progress() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let first = manager(store.clone());
        let mut state = first.create_initial_state("run-1", vec![item("o/a", 1), item("o/a", 2)]);
        state.repo_queues.get_mut(&slug("o/a")).unwrap().advance();
        first.save_state(&state).await.unwrap();
        store
            .put("queue-state/repos/o/b.json", br#"{"schema_version":0}"#, WriteCondition::Any)
            .await
            .unwrap();

        let loaded = manager(store).load_state().await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!loaded.repo_queues.contains_key(&slug("o/b")));
    }

    #[tokio::test]
    async fn test_unknown_status_fails_closed() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let manager = manager(store.clone());
        let state = manager.create_initial_state("run-1", vec![item("o/a", 1)]);
        manager.save_state(&state).await.unwrap();

        let blob = store.get("queue-state/repos/o/a.json").await.unwrap().unwrap();
        let tampered = String::from_utf8(blob.data)
            .unwrap()
            .replace("\"PENDING\"", "\"SNOOZED\"");
        store
            .put("queue-state/repos/o/a.json", tampered.as_bytes(), WriteCondition::Any)
            .await
            .unwrap();

        assert_eq!(manager.load_state().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_removes_every_shard() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let manager = manager(store.clone());
        let state = manager.create_initial_state("run-1", vec![item("o/a", 1), item("o/b", 2)]);
        manager.save_state(&state).await.unwrap();

        manager.clear_state().await.unwrap();
        assert!(store.list("queue-state/").await.unwrap().is_empty());
        assert!(manager.load_state().await.unwrap().is_none());

        // A cleared key can be created again
        manager.save_state(&state).await.unwrap();
    }
}
