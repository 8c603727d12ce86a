//! Queue data model
//!
//! `QueueState` is the unit of durability; queues and items are only ever
//! reached through it.

use crate::error::StateError;
use chrono::{DateTime, Duration, Utc};
use gh_client::RepoSlug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Processing status of a queued PR
///
/// Unknown values fail deserialization instead of falling back to `Pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrStatus {
    #[default]
    Pending,
    Rebasing,
    AwaitingChecks,
    FixTriggered,
    Merging,
    Done,
    Failed,
}

impl PrStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PrStatus::Done | PrStatus::Failed)
    }
}

impl fmt::Display for PrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrStatus::Pending => "PENDING",
            PrStatus::Rebasing => "REBASING",
            PrStatus::AwaitingChecks => "AWAITING_CHECKS",
            PrStatus::FixTriggered => "FIX_TRIGGERED",
            PrStatus::Merging => "MERGING",
            PrStatus::Done => "DONE",
            PrStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Bot identity behind a PR
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotKind {
    Dependabot,
    PreCommitCi,
    Other(String),
}

/// Strip the `app/` prefix and `[bot]` suffix GitHub puts on app logins
pub fn normalize_login(login: &str) -> &str {
    let login = login.strip_prefix("app/").unwrap_or(login);
    login.strip_suffix("[bot]").unwrap_or(login)
}

impl BotKind {
    pub fn from_author(author: &str) -> Self {
        match normalize_login(author) {
            "dependabot" => BotKind::Dependabot,
            "pre-commit-ci" => BotKind::PreCommitCi,
            _ => BotKind::Other(author.to_string()),
        }
    }

    /// Login the bot comments as
    pub fn comment_login(&self) -> &str {
        match self {
            BotKind::Dependabot => "dependabot[bot]",
            BotKind::PreCommitCi => "pre-commit-ci[bot]",
            BotKind::Other(login) => login,
        }
    }
}

/// One pull request tracked in a repository queue
///
/// Identity is `(repo, pr_number)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrQueueItem {
    pub repo: RepoSlug,
    pub pr_number: u64,
    #[serde(default)]
    pub pr_title: String,
    pub pr_author: String,
    pub status: PrStatus,
    /// Processing steps taken across all invocations
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub fix_attempts: u32,
    #[serde(default)]
    pub rebase_attempts: u32,
    /// Head SHA the last fix run was triggered for
    #[serde(default)]
    pub fix_sha: Option<String>,
    #[serde(default)]
    pub fix_run_id: Option<u64>,
    #[serde(default)]
    pub fix_triggered_at: Option<DateTime<Utc>>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub last_action_at: Option<DateTime<Utc>>,
    /// Human-readable outcome of the last step
    #[serde(default)]
    pub last_note: Option<String>,
}

impl PrQueueItem {
    pub fn new(
        repo: RepoSlug,
        pr_number: u64,
        pr_title: impl Into<String>,
        pr_author: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            pr_number,
            pr_title: pr_title.into(),
            pr_author: pr_author.into(),
            status: PrStatus::Pending,
            attempts: 0,
            fix_attempts: 0,
            rebase_attempts: 0,
            fix_sha: None,
            fix_run_id: None,
            fix_triggered_at: None,
            enqueued_at: Utc::now(),
            last_action_at: None,
            last_note: None,
        }
    }

    pub fn bot_kind(&self) -> BotKind {
        BotKind::from_author(&self.pr_author)
    }

    /// Log prefix, e.g. `[octo/widgets#12]`
    pub fn label(&self) -> String {
        format!("[{}#{}]", self.repo, self.pr_number)
    }

    pub fn set_status(&mut self, status: PrStatus, note: impl Into<String>) {
        self.status = status;
        self.last_note = Some(note.into());
        self.last_action_at = Some(Utc::now());
    }
}

/// Ordered PRs of one repository plus a cursor
///
/// `0 <= current_index <= prs.len()`; the queue is complete exactly when the
/// cursor is past the last PR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoQueue {
    prs: Vec<PrQueueItem>,
    current_index: usize,
}

impl RepoQueue {
    /// Build a queue in discovery order, keeping the first of any duplicates
    pub fn new(prs: Vec<PrQueueItem>) -> Self {
        let mut seen = HashSet::new();
        let prs = prs
            .into_iter()
            .filter(|pr| seen.insert(pr.pr_number))
            .collect();
        Self {
            prs,
            current_index: 0,
        }
    }

    pub fn prs(&self) -> &[PrQueueItem] {
        &self.prs
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn len(&self) -> usize {
        self.prs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prs.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.current_index == self.prs.len()
    }

    pub fn current_pr(&self) -> Option<&PrQueueItem> {
        self.prs.get(self.current_index)
    }

    pub fn current_pr_mut(&mut self) -> Option<&mut PrQueueItem> {
        self.prs.get_mut(self.current_index)
    }

    /// Move the cursor to the next PR; no-op once complete
    pub fn advance(&mut self) {
        if self.current_index < self.prs.len() {
            self.current_index += 1;
        }
    }

    /// Check the cursor bound and PR identity for a queue stored under `repo`
    pub fn validate(&self, repo: &RepoSlug) -> Result<(), StateError> {
        if self.current_index > self.prs.len() {
            return Err(StateError::Invariant(format!(
                "{}: cursor {} beyond {} PRs",
                repo,
                self.current_index,
                self.prs.len()
            )));
        }

        let mut seen = HashSet::new();
        for pr in &self.prs {
            if &pr.repo != repo {
                return Err(StateError::Invariant(format!(
                    "{}: contains PR #{} of {}",
                    repo, pr.pr_number, pr.repo
                )));
            }
            if !seen.insert(pr.pr_number) {
                return Err(StateError::Invariant(format!(
                    "{}: PR #{} queued twice",
                    repo, pr.pr_number
                )));
            }
        }
        Ok(())
    }
}

/// Snapshot of one orchestrator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    pub workflow_run_id: String,
    pub timeout_at: DateTime<Utc>,
    pub repo_queues: BTreeMap<RepoSlug, RepoQueue>,
    /// Fully drained repositories, in completion order
    pub completed_repos: Vec<RepoSlug>,
}

impl QueueState {
    pub fn new(workflow_run_id: impl Into<String>, timeout_at: DateTime<Utc>) -> Self {
        Self {
            workflow_run_id: workflow_run_id.into(),
            timeout_at,
            repo_queues: BTreeMap::new(),
            completed_repos: Vec::new(),
        }
    }

    /// Install or replace a repository's queue
    ///
    /// A replaced queue starts over, so the repository leaves `completed_repos`.
    pub fn insert_repo_queue(&mut self, repo: RepoSlug, queue: RepoQueue) {
        self.completed_repos.retain(|r| r != &repo);
        self.repo_queues.insert(repo, queue);
    }

    /// Record a drained repository; returns whether it was newly added
    ///
    /// Refuses repositories whose queue is missing or not complete.
    pub fn mark_completed(&mut self, repo: &RepoSlug) -> bool {
        let complete = self
            .repo_queues
            .get(repo)
            .is_some_and(RepoQueue::is_complete);
        if !complete || self.completed_repos.contains(repo) {
            return false;
        }
        self.completed_repos.push(repo.clone());
        true
    }

    pub fn is_completed(&self, repo: &RepoSlug) -> bool {
        self.completed_repos.contains(repo)
    }

    /// Every known queue is drained
    pub fn all_complete(&self) -> bool {
        self.repo_queues.values().all(RepoQueue::is_complete)
    }

    pub fn validate(&self) -> Result<(), StateError> {
        for (repo, queue) in &self.repo_queues {
            queue.validate(repo)?;
        }

        let mut seen = HashSet::new();
        for repo in &self.completed_repos {
            if !seen.insert(repo) {
                return Err(StateError::Invariant(format!(
                    "{} listed as completed twice",
                    repo
                )));
            }
            match self.repo_queues.get(repo) {
                Some(queue) if queue.is_complete() => {}
                Some(_) => {
                    return Err(StateError::Invariant(format!(
                        "{} listed as completed but its queue is not drained",
                        repo
                    )));
                }
                None => {
                    return Err(StateError::Invariant(format!(
                        "{} listed as completed but has no queue",
                        repo
                    )));
                }
            }
        }
        Ok(())
    }

    /// Move the deadline to `now + budget`
    pub fn rearm_deadline(&mut self, now: DateTime<Utc>, budget: Duration) {
        self.timeout_at = now + budget;
    }

    /// Time left until the deadline; negative once it passed
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.timeout_at - now
    }
}
