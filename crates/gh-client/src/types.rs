//! Values exchanged with GitHub
//!
//! Plain data only; queue bookkeeping lives in the orchestrator crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A repository identifier in `owner/name` form
///
/// Both halves are validated so they can be interpolated into API routes
/// and GraphQL documents without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoSlug {
    owner: String,
    name: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> anyhow::Result<Self> {
        let owner = owner.into();
        let name = name.into();
        for part in [&owner, &name] {
            if part.is_empty()
                || !part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                anyhow::bail!("invalid repository component '{}'", part);
            }
        }
        Ok(Self { owner, name })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for RepoSlug {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if !name.contains('/') => Self::new(owner, name),
            _ => anyhow::bail!("repository '{}' is not in owner/name form", s),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl Serialize for RepoSlug {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RepoSlug {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

/// Mergeability as computed by GitHub
///
/// GitHub computes this lazily after every push to the PR or its base,
/// so `Unknown` is a normal transient value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mergeable {
    Mergeable,
    Conflicting,
    #[default]
    Unknown,
}

impl Mergeable {
    /// Parse the GraphQL enum value, mapping anything unexpected to `Unknown`
    pub fn from_graphql(value: &str) -> Self {
        match value {
            "MERGEABLE" => Mergeable::Mergeable,
            "CONFLICTING" => Mergeable::Conflicting,
            _ => Mergeable::Unknown,
        }
    }
}

impl fmt::Display for Mergeable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mergeable::Mergeable => "MERGEABLE",
            Mergeable::Conflicting => "CONFLICTING",
            Mergeable::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Review decision on a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    ReviewRequired,
}

/// Status of a single check in the rollup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    /// Check is queued
    Queued,
    /// Check is in progress
    InProgress,
    /// Check is waiting or pending (includes legacy status contexts)
    Pending,
    /// Check has completed
    Completed,
}

impl CheckRunStatus {
    pub fn from_graphql(value: &str) -> Self {
        match value {
            "COMPLETED" => CheckRunStatus::Completed,
            "IN_PROGRESS" => CheckRunStatus::InProgress,
            "QUEUED" => CheckRunStatus::Queued,
            _ => CheckRunStatus::Pending,
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(self, CheckRunStatus::Completed)
    }
}

/// Conclusion of a completed check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    /// Check passed
    Success,
    /// Check failed
    Failure,
    /// Check was neutral (neither success nor failure)
    Neutral,
    /// Check was cancelled
    Cancelled,
    /// Check was skipped
    Skipped,
    /// Check timed out
    TimedOut,
    /// Action is required from the user
    ActionRequired,
    /// Check is stale (superseded by newer run)
    Stale,
    /// Check could not start
    StartupFailure,
    /// Legacy status context reported an error
    Error,
}

impl CheckConclusion {
    /// Conclusions that let a PR through
    pub fn is_passing(&self) -> bool {
        matches!(
            self,
            CheckConclusion::Success | CheckConclusion::Neutral | CheckConclusion::Skipped
        )
    }

    /// Conclusions that indicate a broken build
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CheckConclusion::Failure
                | CheckConclusion::TimedOut
                | CheckConclusion::StartupFailure
                | CheckConclusion::Error
        )
    }
}

/// Convert conclusion string from GitHub API to our enum
///
/// Accepts both the REST (`timed_out`) and GraphQL (`TIMED_OUT`) spellings.
pub fn parse_conclusion(conclusion: &str) -> CheckConclusion {
    match conclusion.to_lowercase().as_str() {
        "success" => CheckConclusion::Success,
        "failure" => CheckConclusion::Failure,
        "neutral" => CheckConclusion::Neutral,
        "cancelled" => CheckConclusion::Cancelled,
        "skipped" => CheckConclusion::Skipped,
        "timed_out" => CheckConclusion::TimedOut,
        "action_required" => CheckConclusion::ActionRequired,
        "stale" => CheckConclusion::Stale,
        "startup_failure" => CheckConclusion::StartupFailure,
        "error" => CheckConclusion::Error,
        _ => CheckConclusion::Neutral,
    }
}

/// One entry of a PR's status-check rollup
///
/// Check runs and legacy commit status contexts are both normalized into
/// this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckEntry {
    /// Check run name or status context
    pub name: String,
    pub status: CheckRunStatus,
    /// Only set once the check completed
    pub conclusion: Option<CheckConclusion>,
}

impl CheckEntry {
    pub fn completed(name: impl Into<String>, conclusion: CheckConclusion) -> Self {
        Self {
            name: name.into(),
            status: CheckRunStatus::Completed,
            conclusion: Some(conclusion),
        }
    }

    pub fn running(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckRunStatus::InProgress,
            conclusion: None,
        }
    }

    /// Still queued or in progress
    pub fn is_running(&self) -> bool {
        self.conclusion.is_none() || self.status.is_running()
    }
}

/// Live status of a pull request: state, mergeability and check rollup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestStatus {
    pub state: PullRequestState,
    pub mergeable: Mergeable,
    /// HEAD commit SHA
    pub head_sha: String,
    /// HEAD branch name
    pub head_ref: String,
    /// Base branch name (e.g., "main")
    pub base_ref: String,
    pub review_decision: Option<ReviewDecision>,
    /// Rollup of the head commit's checks
    pub checks: Vec<CheckEntry>,
}

/// Branch coordinates of a pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRefs {
    pub head_sha: String,
    pub head_ref: String,
    pub base_ref: String,
}

/// A conversation comment on a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    /// Author's GitHub login (bots carry a `[bot]` suffix)
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Merge method for pull requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    /// Create a merge commit
    Merge,
    /// Squash all commits into one
    #[default]
    Squash,
    /// Rebase commits onto the base branch
    Rebase,
}

impl MergeMethod {
    pub fn as_graphql(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "MERGE",
            MergeMethod::Squash => "SQUASH",
            MergeMethod::Rebase => "REBASE",
        }
    }
}

/// Review event type for PR reviews
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    /// Approve the PR
    Approve,
    /// Request changes
    RequestChanges,
    /// Comment only (no approval/rejection)
    Comment,
}

/// A GitHub Actions workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Workflow run ID
    pub id: u64,
    /// Status of the run
    pub status: WorkflowRunStatus,
    /// Conclusion (only set when completed)
    pub conclusion: Option<WorkflowRunConclusion>,
    /// URL to view the workflow run
    pub html_url: String,
    /// When the run was created
    pub created_at: DateTime<Utc>,
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    /// Workflow is queued
    Queued,
    /// Workflow is waiting
    Waiting,
    /// Workflow is in progress
    InProgress,
    /// Workflow has completed
    Completed,
    /// Workflow is pending
    Pending,
    /// Workflow was requested but not yet queued
    Requested,
}

/// Conclusion of a completed workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunConclusion {
    /// Workflow succeeded
    Success,
    /// Workflow failed
    Failure,
    /// Workflow was neutral
    Neutral,
    /// Workflow was cancelled
    Cancelled,
    /// Workflow was skipped
    Skipped,
    /// Workflow timed out
    TimedOut,
    /// Action required
    ActionRequired,
    /// Workflow is stale
    Stale,
    /// Workflow could not start
    StartupFailure,
}

/// A file read through the contents API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    /// Decoded file content
    pub content: Vec<u8>,
    /// Blob SHA, used as the precondition for updates and deletes
    pub sha: String,
}

/// An entry of a directory listing from the contents API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Path relative to the repository root
    pub path: String,
    pub is_dir: bool,
}

/// Result of a conditional contents write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// Written; carries the new blob SHA
    Written(String),
    /// The file changed (or appeared) since the given SHA was observed
    Conflict,
}
