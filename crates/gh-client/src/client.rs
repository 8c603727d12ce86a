//! GitHub client trait
//!
//! This module defines the `GitHubClient` trait, the narrow command
//! interface the queue orchestrator uses to talk to GitHub. Everything the
//! orchestrator needs from the hosting platform goes through it, which keeps
//! the orchestrator testable against a recording mock.

use crate::types::{
    DirectoryEntry, IssueComment, MergeMethod, PullRequestRefs, PullRequestStatus, PutOutcome,
    RepoFile, RepoSlug, ReviewEvent, WorkflowRun,
};
use async_trait::async_trait;

/// GitHub API client trait
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow sharing across
/// async tasks and threads.
///
/// # Example
///
/// ```rust,ignore
/// use gh_client::{GitHubClient, RepoSlug};
///
/// async fn head(client: &dyn GitHubClient, repo: &RepoSlug) -> anyhow::Result<String> {
///     Ok(client.fetch_pull_request_refs(repo, 42).await?.head_sha)
/// }
/// ```
#[async_trait]
pub trait GitHubClient: Send + Sync {
    // === Pull request reads ===

    /// Fetch state, mergeability, review decision and check rollup of a PR
    ///
    /// The check rollup covers the PR's head commit and merges check runs
    /// with legacy commit status contexts.
    async fn fetch_pull_request_status(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
    ) -> anyhow::Result<PullRequestStatus>;

    /// Fetch head SHA and head/base branch names of a PR
    async fn fetch_pull_request_refs(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
    ) -> anyhow::Result<PullRequestRefs>;

    /// Fetch all conversation comments on a PR, oldest first
    async fn fetch_issue_comments(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
    ) -> anyhow::Result<Vec<IssueComment>>;

    // === Pull request mutations ===

    /// Post a conversation comment on a PR
    async fn create_issue_comment(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
        body: &str,
    ) -> anyhow::Result<()>;

    /// Create a review on a pull request
    async fn create_review(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
        event: ReviewEvent,
        body: &str,
    ) -> anyhow::Result<()>;

    /// Enable auto-merge so GitHub merges the PR once its requirements pass
    async fn enable_auto_merge(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
        merge_method: MergeMethod,
    ) -> anyhow::Result<()>;

    // === Actions ===

    /// Dispatch a `workflow_dispatch` workflow
    ///
    /// # Arguments
    ///
    /// * `repo` - Repository hosting the workflow
    /// * `workflow` - Workflow file name (e.g., "fix-remote-pr.yml") or ID
    /// * `git_ref` - Branch or tag to run the workflow on
    /// * `inputs` - Workflow inputs as a JSON object
    async fn dispatch_workflow(
        &self,
        repo: &RepoSlug,
        workflow: &str,
        git_ref: &str,
        inputs: &serde_json::Value,
    ) -> anyhow::Result<()>;

    /// List the most recent runs of a workflow, newest first
    async fn list_workflow_runs(
        &self,
        repo: &RepoSlug,
        workflow: &str,
        limit: u8,
    ) -> anyhow::Result<Vec<WorkflowRun>>;

    /// Fetch a single workflow run
    async fn fetch_workflow_run(&self, repo: &RepoSlug, run_id: u64)
        -> anyhow::Result<WorkflowRun>;

    // === Identity ===

    /// Login of the identity the client authenticates as
    async fn authenticated_login(&self) -> anyhow::Result<String>;

    // === Contents ===

    /// Read a file from a branch; `None` if it does not exist
    async fn get_file(
        &self,
        repo: &RepoSlug,
        branch: &str,
        path: &str,
    ) -> anyhow::Result<Option<RepoFile>>;

    /// Create or update a file on a branch
    ///
    /// `expected_sha` is `None` to create a file that must not exist yet, or
    /// the blob SHA last observed to update it. A mismatch is reported as
    /// `PutOutcome::Conflict`, never as an error.
    async fn put_file(
        &self,
        repo: &RepoSlug,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
        expected_sha: Option<&str>,
    ) -> anyhow::Result<PutOutcome>;

    /// Delete a file on a branch
    async fn delete_file(
        &self,
        repo: &RepoSlug,
        branch: &str,
        path: &str,
        sha: &str,
        message: &str,
    ) -> anyhow::Result<()>;

    /// List entries directly inside a directory; empty if it does not exist
    async fn list_directory(
        &self,
        repo: &RepoSlug,
        branch: &str,
        path: &str,
    ) -> anyhow::Result<Vec<DirectoryEntry>>;
}
