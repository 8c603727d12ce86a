//! Remote operations on a PR: rebase, fix workflow runs, approve and merge
//!
//! Transport errors stop here. Every public operation turns them into a
//! typed outcome (`bool`, `Option`, or an enum) after logging them.

use crate::git::GitRunner;
use crate::models::{normalize_login, BotKind, PrQueueItem};
use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gh_client::{
    GitHubClient, IssueComment, MergeMethod, RepoSlug, ReviewDecision, ReviewEvent,
    WorkflowRunConclusion, WorkflowRunStatus,
};
use gh_pr_queue_config::AppConfig;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEPENDABOT_REBASE_COMMAND: &str = "@dependabot rebase";
const FIX_MARKER_PREFIX: &str = "<!-- gh-pr-queue:fix sha=";
const FIX_MARKER_SUFFIX: &str = " -->";
const CLONE_DEPTH: &str = "--depth=50";

/// Hidden marker recording which head SHA a fix was triggered for
pub fn fix_marker(sha: &str) -> String {
    format!("{}{}{}", FIX_MARKER_PREFIX, sha, FIX_MARKER_SUFFIX)
}

/// Head SHA of the last fix marker in a comment body
pub fn parse_fix_marker(body: &str) -> Option<&str> {
    let start = body.rfind(FIX_MARKER_PREFIX)? + FIX_MARKER_PREFIX.len();
    let rest = &body[start..];
    let end = rest.find(FIX_MARKER_SUFFIX)?;
    let sha = rest[..end].trim();
    (!sha.is_empty()).then_some(sha)
}

/// Terminal state of a polled workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Success,
    Failure,
    Cancelled,
    /// Still running when the polling budget ran out
    Running,
    /// Polling aborted on a query error
    Unknown,
}

impl WorkflowOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkflowOutcome::Success | WorkflowOutcome::Failure | WorkflowOutcome::Cancelled
        )
    }
}

impl fmt::Display for WorkflowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowOutcome::Success => "SUCCESS",
            WorkflowOutcome::Failure => "FAILURE",
            WorkflowOutcome::Cancelled => "CANCELLED",
            WorkflowOutcome::Running => "RUNNING",
            WorkflowOutcome::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Map a completed run's conclusion
pub fn outcome_from_conclusion(conclusion: WorkflowRunConclusion) -> WorkflowOutcome {
    match conclusion {
        WorkflowRunConclusion::Success => WorkflowOutcome::Success,
        WorkflowRunConclusion::Failure
        | WorkflowRunConclusion::TimedOut
        | WorkflowRunConclusion::ActionRequired
        | WorkflowRunConclusion::StartupFailure
        | WorkflowRunConclusion::Neutral => WorkflowOutcome::Failure,
        WorkflowRunConclusion::Cancelled
        | WorkflowRunConclusion::Skipped
        | WorkflowRunConclusion::Stale => WorkflowOutcome::Cancelled,
    }
}

/// Result of asking for a fix run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixTrigger {
    /// Dispatched and the run was located
    Started(u64),
    /// Dispatched but the run did not show up in time
    Untracked,
    /// Dispatch failed; nothing was started
    Failed,
}

impl FixTrigger {
    pub fn run_id(&self) -> Option<u64> {
        match self {
            FixTrigger::Started(id) => Some(*id),
            _ => None,
        }
    }

    pub fn dispatched(&self) -> bool {
        !matches!(self, FixTrigger::Failed)
    }
}

/// A fix marker found on the PR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixMarker {
    pub sha: String,
    pub created_at: DateTime<Utc>,
}

/// Settings of the remote operations
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub bot_repo: RepoSlug,
    pub bot_ref: String,
    pub fix_workflow: String,
    pub approval_message: String,
    pub poll_interval: Duration,
    pub run_visibility_delay: Duration,
}

impl WorkflowSettings {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let bot_repo = config
            .bot_repo
            .parse()
            .with_context(|| format!("Invalid bot_repo '{}'", config.bot_repo))?;
        Ok(Self {
            bot_repo,
            bot_ref: config.bot_ref.clone(),
            fix_workflow: config.fix_workflow.clone(),
            approval_message: config.approval_message.clone(),
            poll_interval: Duration::from_secs(config.polling.poll_interval_secs.max(1)),
            run_visibility_delay: Duration::from_secs(config.polling.run_visibility_delay_secs),
        })
    }
}

pub struct WorkflowClient {
    client: Arc<dyn GitHubClient>,
    git: Arc<dyn GitRunner>,
    settings: WorkflowSettings,
}

impl WorkflowClient {
    pub fn new(
        client: Arc<dyn GitHubClient>,
        git: Arc<dyn GitRunner>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            client,
            git,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    async fn comments(&self, pr: &PrQueueItem) -> Vec<IssueComment> {
        match self.client.fetch_issue_comments(&pr.repo, pr.pr_number).await {
            Ok(comments) => comments,
            Err(e) => {
                warn!("{} Failed to fetch comments: {:#}", pr.label(), e);
                Vec::new()
            }
        }
    }

    /// Body of the latest comment by `author`, or by the PR's bot when `None`
    ///
    /// Returns an empty string when there is no such comment or the
    /// comments cannot be fetched.
    pub async fn check_latest_comment(&self, pr: &PrQueueItem, author: Option<&str>) -> String {
        let bot = pr.bot_kind();
        let author = author.unwrap_or_else(|| bot.comment_login());
        let wanted = normalize_login(author);

        self.comments(pr)
            .await
            .into_iter()
            .filter(|c| normalize_login(&c.author) == wanted)
            .max_by_key(|c| c.created_at)
            .map(|c| c.body)
            .unwrap_or_default()
    }

    /// Latest fix marker on the PR, optionally only from `author`
    pub async fn latest_fix_marker(
        &self,
        pr: &PrQueueItem,
        author: Option<&str>,
    ) -> Option<FixMarker> {
        let wanted = author.map(normalize_login);
        self.comments(pr)
            .await
            .into_iter()
            .filter(|c| wanted.is_none_or(|w| normalize_login(&c.author) == w))
            .filter_map(|c| {
                parse_fix_marker(&c.body).map(|sha| FixMarker {
                    sha: sha.to_string(),
                    created_at: c.created_at,
                })
            })
            .max_by_key(|m| m.created_at)
    }

    pub async fn get_pr_head_sha(&self, pr: &PrQueueItem) -> Option<String> {
        match self
            .client
            .fetch_pull_request_refs(&pr.repo, pr.pr_number)
            .await
        {
            Ok(refs) => Some(refs.head_sha),
            Err(e) => {
                warn!("{} Failed to read head SHA: {:#}", pr.label(), e);
                None
            }
        }
    }

    /// Bring the PR branch up to date with its base
    ///
    /// Dependabot is asked via comment; pre-commit.ci ignores comment
    /// commands, so its branch is rebased and pushed here.
    pub async fn trigger_rebase(&self, pr: &PrQueueItem) -> bool {
        match pr.bot_kind() {
            BotKind::Dependabot => {
                match self
                    .client
                    .create_issue_comment(&pr.repo, pr.pr_number, DEPENDABOT_REBASE_COMMAND)
                    .await
                {
                    Ok(()) => {
                        info!("{} Rebase requested from dependabot", pr.label());
                        true
                    }
                    Err(e) => {
                        error!("{} Failed to request rebase: {:#}", pr.label(), e);
                        false
                    }
                }
            }
            BotKind::PreCommitCi => {
                info!("{} Rebasing pre-commit.ci branch manually", pr.label());
                match self.manual_rebase(pr).await {
                    Ok(()) => {
                        info!("{} Rebased and pushed", pr.label());
                        true
                    }
                    Err(e) => {
                        error!("{} Manual rebase failed: {:#}", pr.label(), e);
                        false
                    }
                }
            }
            BotKind::Other(author) => {
                error!("{} Cannot rebase PRs authored by {}", pr.label(), author);
                false
            }
        }
    }

    async fn manual_rebase(&self, pr: &PrQueueItem) -> anyhow::Result<()> {
        let refs = self
            .client
            .fetch_pull_request_refs(&pr.repo, pr.pr_number)
            .await
            .context("Failed to read PR refs")?;
        debug!(
            "{} Rebasing {} onto {} (head {})",
            pr.label(),
            refs.head_ref,
            refs.base_ref,
            refs.head_sha
        );

        let workdir = tempfile::Builder::new()
            .prefix("gh-pr-queue-rebase-")
            .tempdir()
            .context("Failed to create clone directory")?;
        let url = format!("https://github.com/{}.git", pr.repo);

        self.git
            .run(workdir.path(), &["clone", CLONE_DEPTH, &url, "repo"])
            .await?;

        let repo_dir = workdir.path().join("repo");
        let head_refspec = format!("{0}:{0}", refs.head_ref);
        let base_remote = format!("origin/{}", refs.base_ref);
        let lease = format!("--force-with-lease={}:{}", refs.head_ref, refs.head_sha);

        let steps: [&[&str]; 5] = [
            &["fetch", "origin", &head_refspec],
            &["checkout", &refs.head_ref],
            &["fetch", "origin", &refs.base_ref],
            &["rebase", &base_remote],
            &["push", &lease, "origin", &refs.head_ref],
        ];
        for args in steps {
            self.git.run(&repo_dir, args).await?;
        }
        Ok(())
    }

    /// Dispatch the fix workflow for this PR and locate its run
    pub async fn trigger_fix_workflow(&self, pr: &PrQueueItem) -> FixTrigger {
        let inputs = serde_json::json!({
            "target_repo": pr.repo.to_string(),
            "pr_number": pr.pr_number.to_string(),
        });
        let dispatched_at = Utc::now();

        if let Err(e) = self
            .client
            .dispatch_workflow(
                &self.settings.bot_repo,
                &self.settings.fix_workflow,
                &self.settings.bot_ref,
                &inputs,
            )
            .await
        {
            error!("{} Failed to dispatch fix workflow: {:#}", pr.label(), e);
            return FixTrigger::Failed;
        }
        info!(
            "{} Dispatched {} on {}",
            pr.label(),
            self.settings.fix_workflow,
            self.settings.bot_repo
        );

        tokio::time::sleep(self.settings.run_visibility_delay).await;

        match self
            .find_run_since(dispatched_at - ChronoDuration::minutes(1))
            .await
        {
            Some(run_id) => {
                info!("{} Fix workflow run {}", pr.label(), run_id);
                FixTrigger::Started(run_id)
            }
            None => {
                warn!("{} Fix workflow run not visible yet", pr.label());
                FixTrigger::Untracked
            }
        }
    }

    async fn find_run_since(&self, since: DateTime<Utc>) -> Option<u64> {
        let runs = self
            .client
            .list_workflow_runs(&self.settings.bot_repo, &self.settings.fix_workflow, 5)
            .await;
        match runs {
            Ok(runs) => runs
                .into_iter()
                .filter(|run| run.created_at >= since)
                .max_by_key(|run| run.created_at)
                .map(|run| run.id),
            Err(e) => {
                warn!("Failed to list fix workflow runs: {:#}", e);
                None
            }
        }
    }

    /// Poll a fix run until it finishes or `timeout` is used up
    pub async fn poll_workflow_status(&self, run_id: u64, timeout: Duration) -> WorkflowOutcome {
        let interval = self.settings.poll_interval;
        let max_attempts = (timeout.as_secs() / interval.as_secs().max(1)).max(1);

        info!("Monitoring fix workflow run {}", run_id);
        for attempt in 1..=max_attempts {
            let run = match self
                .client
                .fetch_workflow_run(&self.settings.bot_repo, run_id)
                .await
            {
                Ok(run) => run,
                Err(e) => {
                    error!("Error polling workflow run {}: {:#}", run_id, e);
                    return WorkflowOutcome::Unknown;
                }
            };

            if run.status == WorkflowRunStatus::Completed {
                if let Some(conclusion) = run.conclusion {
                    let outcome = outcome_from_conclusion(conclusion);
                    info!("Fix workflow run {} finished: {}", run_id, outcome);
                    return outcome;
                }
            }

            debug!(
                "Fix workflow run {} is {:?} (attempt {}/{})",
                run_id, run.status, attempt, max_attempts
            );
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        info!(
            "Fix workflow run {} still running after {}s",
            run_id,
            timeout.as_secs()
        );
        WorkflowOutcome::Running
    }

    /// Approve (unless already approved) and enable squash auto-merge
    pub async fn auto_merge_pr(&self, pr: &PrQueueItem) -> bool {
        let status = match self
            .client
            .fetch_pull_request_status(&pr.repo, pr.pr_number)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                error!("{} Failed to read review state: {:#}", pr.label(), e);
                return false;
            }
        };

        if status.review_decision == Some(ReviewDecision::Approved) {
            debug!("{} Already approved", pr.label());
        } else if let Err(e) = self
            .client
            .create_review(
                &pr.repo,
                pr.pr_number,
                ReviewEvent::Approve,
                &self.settings.approval_message,
            )
            .await
        {
            error!("{} Failed to approve: {:#}", pr.label(), e);
            return false;
        }

        match self
            .client
            .enable_auto_merge(&pr.repo, pr.pr_number, MergeMethod::Squash)
            .await
        {
            Ok(()) => {
                info!("{} Auto-merge enabled", pr.label());
                true
            }
            Err(e) => {
                error!("{} Failed to enable auto-merge: {:#}", pr.label(), e);
                false
            }
        }
    }

    /// Leave a marker comment so later runs see the fix was already tried
    pub async fn record_fix_trigger(
        &self,
        pr: &PrQueueItem,
        sha: &str,
        run_id: Option<u64>,
    ) -> bool {
        let short = &sha[..sha.len().min(7)];
        let run = match run_id {
            Some(id) => format!(
                " ([run {}](https://github.com/{}/actions/runs/{}))",
                id, self.settings.bot_repo, id
            ),
            None => String::new(),
        };
        let body = format!(
            "Triggered the fix workflow for commit `{}`{}.\n\n{}",
            short,
            run,
            fix_marker(sha)
        );

        match self
            .client
            .create_issue_comment(&pr.repo, pr.pr_number, &body)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("{} Failed to record fix trigger: {:#}", pr.label(), e);
                false
            }
        }
    }
}
