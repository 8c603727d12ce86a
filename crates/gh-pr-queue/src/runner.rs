//! One CLI invocation: wire the components and run a flow
//!
//! `process` is the scheduled entry point. Each invocation owns exactly one
//! repository; invocations for other repositories of the same run may be
//! executing at the same time against the same store.

use crate::error::StateError;
use crate::git::GitRunner;
use crate::input::parse_discovered_prs;
use crate::models::{PrQueueItem, QueueState, RepoQueue};
use crate::pr_processor::{PrProcessor, ProcessorSettings};
use crate::queue_manager::QueueManager;
use crate::state_manager::StateManager;
use crate::status_poller::StatusPoller;
use crate::store::{BlobStore, FileBlobStore, GitHubContentsStore};
use crate::workflow_client::{WorkflowClient, WorkflowSettings};
use anyhow::Context;
use chrono::{Duration, Utc};
use gh_client::{GitHubClient, RepoSlug};
use gh_pr_queue_config::{AppConfig, StateBackend};
use log::{info, warn};
use std::fmt::Write as _;
use std::sync::Arc;

/// Input of a `process` invocation
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub repo: RepoSlug,
    pub workflow_run_id: String,
    /// Discovered PR list as JSON
    pub prs_json: String,
    /// Overrides `run_budget_minutes`
    pub budget_minutes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The repository queue is drained
    Drained,
    /// Stopped early; the next invocation resumes from the saved cursor
    Suspended,
}

/// Blob store selected by `[state] backend`
pub fn open_store(
    config: &AppConfig,
    client: Arc<dyn GitHubClient>,
) -> anyhow::Result<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.state.backend {
        StateBackend::File => Arc::new(FileBlobStore::new(config.state.dir.clone())),
        StateBackend::Github => {
            let repo: RepoSlug = config
                .state_repo()
                .parse()
                .with_context(|| format!("Invalid state repository '{}'", config.state_repo()))?;
            Arc::new(GitHubContentsStore::new(
                client,
                repo,
                config.state.branch.clone(),
            ))
        }
    };
    Ok(store)
}

/// Login whose fix markers count, from config or the token's identity
///
/// App installation tokens cannot read `/user`; the result is then `None`
/// and markers from any author are accepted.
pub async fn resolve_bot_login(config: &AppConfig, client: &dyn GitHubClient) -> Option<String> {
    if let Some(login) = &config.bot_login {
        return Some(login.clone());
    }
    match client.authenticated_login().await {
        Ok(login) => {
            info!("Acting as {}", login);
            Some(login)
        }
        Err(e) => {
            warn!(
                "Could not determine own login ({:#}); accepting fix markers from any author",
                e
            );
            None
        }
    }
}

pub struct Runner {
    config: AppConfig,
    client: Arc<dyn GitHubClient>,
    git: Arc<dyn GitRunner>,
    store: Arc<dyn BlobStore>,
}

fn minutes(value: u64) -> Duration {
    Duration::minutes(i64::try_from(value).unwrap_or(i64::MAX / 60_000))
}

impl Runner {
    pub fn new(
        config: AppConfig,
        client: Arc<dyn GitHubClient>,
        git: Arc<dyn GitRunner>,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            client,
            git,
            store,
        }
    }

    fn state_manager(&self, budget_minutes: Option<u64>) -> Arc<StateManager> {
        let budget = minutes(budget_minutes.unwrap_or(self.config.run_budget_minutes));
        Arc::new(StateManager::new(
            self.store.clone(),
            self.config.state.prefix.clone(),
            budget,
        ))
    }

    async fn build_queue_manager(
        &self,
        state_manager: Arc<StateManager>,
    ) -> anyhow::Result<QueueManager> {
        let bot_login = resolve_bot_login(&self.config, self.client.as_ref()).await;
        let poller = StatusPoller::new(
            self.client.clone(),
            self.config.polling.clone(),
            self.config.orchestrator_check_name.clone(),
        );
        let workflows = WorkflowClient::new(
            self.client.clone(),
            self.git.clone(),
            WorkflowSettings::from_config(&self.config)?,
        );
        let processor = PrProcessor::new(
            poller,
            workflows,
            ProcessorSettings::from_config(&self.config, bot_login),
        );
        Ok(QueueManager::new(
            Arc::new(processor),
            state_manager,
            minutes(self.config.timeout_threshold_minutes),
        ))
    }

    /// Process this invocation's repository queue
    pub async fn process(&self, request: &ProcessRequest) -> anyhow::Result<ProcessOutcome> {
        // Malformed input is fatal before any state is touched
        let prs = parse_discovered_prs(&request.prs_json, &request.repo)?;
        let repo = &request.repo;
        let state_manager = self.state_manager(request.budget_minutes);
        info!(
            "[{}] {} discovered PR(s), state in {}",
            repo,
            prs.len(),
            state_manager.describe()
        );

        let mut state = load_or_create(&state_manager, &request.workflow_run_id, &prs).await?;
        if !state.repo_queues.contains_key(repo) {
            state.insert_repo_queue(repo.clone(), RepoQueue::new(prs));
        }
        state.rearm_deadline(Utc::now(), state_manager.run_budget());
        state_manager
            .save_repo(&state, repo)
            .await
            .with_context(|| format!("Failed to save initial state for {}", repo))?;

        let queue_manager = self.build_queue_manager(state_manager.clone()).await?;
        let completed = queue_manager
            .process_repo_queue(repo, &mut state)
            .await
            .with_context(|| format!("Failed to persist progress for {}", repo))?;

        if !completed {
            info!("[{}] Suspended, will resume on the next run", repo);
            return Ok(ProcessOutcome::Suspended);
        }

        // Other repositories may have progressed since this run loaded
        match state_manager.load_state().await {
            Ok(Some(latest))
                if latest.workflow_run_id == request.workflow_run_id && latest.all_complete() =>
            {
                info!("All {} queue(s) of the run drained", latest.repo_queues.len());
                state_manager.clear_state().await?;
            }
            Ok(_) => info!("[{}] Drained; other queues still pending", repo),
            Err(e) => warn!("Not clearing state: {:#}", e),
        }
        Ok(ProcessOutcome::Drained)
    }

    pub async fn status(&self) -> anyhow::Result<Option<QueueState>> {
        Ok(self.state_manager(None).load_state().await?)
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        self.state_manager(None).clear_state().await?;
        Ok(())
    }
}

/// Load the run's state, starting over when it is absent or stale
///
/// A corrupt shard never reaches here: it is left out of the loaded state
/// and its repository's queue is rebuilt from the discovered PRs.
async fn load_or_create(
    state_manager: &StateManager,
    workflow_run_id: &str,
    prs: &[PrQueueItem],
) -> Result<QueueState, StateError> {
    let fresh = || state_manager.create_initial_state(workflow_run_id, prs.to_vec());

    match state_manager.load_state().await {
        Ok(Some(state)) if state.workflow_run_id == workflow_run_id => {
            info!(
                "Resuming run {} ({} queue(s), {} completed)",
                state.workflow_run_id,
                state.repo_queues.len(),
                state.completed_repos.len()
            );
            Ok(state)
        }
        Ok(Some(state)) => {
            info!(
                "Found state of run {}, starting fresh for run {}",
                state.workflow_run_id, workflow_run_id
            );
            Ok(fresh())
        }
        Ok(None) => {
            info!("No saved state, starting run {}", workflow_run_id);
            Ok(fresh())
        }
        Err(e) => Err(e),
    }
}

/// Human-readable summary of a run's state
pub fn render_status(state: &QueueState) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Run {} (deadline {})",
        state.workflow_run_id,
        state.timeout_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for (repo, queue) in &state.repo_queues {
        let marker = if state.is_completed(repo) {
            " [completed]"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{} {}/{}{}",
            repo,
            queue.current_index(),
            queue.len(),
            marker
        );
        for (index, pr) in queue.prs().iter().enumerate() {
            let cursor = if index == queue.current_index() { ">" } else { " " };
            let note = pr.last_note.as_deref().unwrap_or("");
            let _ = writeln!(
                out,
                "  {} #{:<6} {:<16} {}  {}",
                cursor,
                pr.pr_number,
                pr.status.to_string(),
                pr.pr_title,
                note
            );
        }
    }
    out
}
