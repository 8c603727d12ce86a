//! Drives one repository queue until it drains or has to suspend

use crate::error::StateError;
use crate::models::QueueState;
use crate::pr_processor::PrProcessing;
use crate::state_manager::StateManager;
use chrono::{Duration, Utc};
use gh_client::RepoSlug;
use log::{info, warn};
use std::sync::Arc;

pub struct QueueManager {
    processor: Arc<dyn PrProcessing>,
    state_manager: Arc<StateManager>,
    timeout_threshold: Duration,
}

impl QueueManager {
    pub fn new(
        processor: Arc<dyn PrProcessing>,
        state_manager: Arc<StateManager>,
        timeout_threshold: Duration,
    ) -> Self {
        Self {
            processor,
            state_manager,
            timeout_threshold,
        }
    }

    /// Less than the threshold is left before the run deadline
    pub fn is_timeout_approaching(&self, state: &QueueState) -> bool {
        state.time_remaining(Utc::now()) < self.timeout_threshold
    }

    /// Process `repo`'s queue from its cursor
    ///
    /// Returns `Ok(true)` once the queue is drained and `Ok(false)` when the
    /// invocation should end and resume later. State is saved after every
    /// PR step; only this repository's shard is written.
    pub async fn process_repo_queue(
        &self,
        repo: &RepoSlug,
        state: &mut QueueState,
    ) -> Result<bool, StateError> {
        let Some(queue) = state.repo_queues.get(repo) else {
            warn!("[{}] No queue found", repo);
            return Ok(true);
        };
        info!(
            "[{}] Processing queue: {} PR(s), at position {}/{}",
            repo,
            queue.len(),
            (queue.current_index() + 1).min(queue.len()),
            queue.len()
        );

        loop {
            if self.is_timeout_approaching(state) {
                warn!("[{}] Run deadline approaching, saving and stopping", repo);
                self.state_manager.save_repo(state, repo).await?;
                return Ok(false);
            }

            let time_left = (state.time_remaining(Utc::now()) - self.timeout_threshold)
                .to_std()
                .unwrap_or_default();

            let Some(queue) = state.repo_queues.get_mut(repo) else {
                break;
            };
            let Some(pr) = queue.current_pr_mut() else {
                break;
            };

            let advance = self.processor.process_pr(pr, time_left).await;
            if advance {
                info!("{} Moving to the next PR", pr.label());
                queue.advance();
            } else {
                info!("{} Needs more time, resuming next run", pr.label());
            }

            self.state_manager.save_repo(state, repo).await?;
            if !advance {
                return Ok(false);
            }
        }

        if state.mark_completed(repo) {
            self.state_manager.save_repo(state, repo).await?;
        }
        info!("[{}] Completed all PRs", repo);
        Ok(true)
    }
}
