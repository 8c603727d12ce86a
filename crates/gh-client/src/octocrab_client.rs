//! Octocrab-based GitHub API client
//!
//! Direct implementation of the `GitHubClient` trait using the octocrab library.
//! Reads that octocrab has no typed model for go through raw REST routes or
//! GraphQL and are decoded into local serde structs.

use crate::client::GitHubClient;
use crate::types::{
    parse_conclusion, CheckConclusion, CheckEntry, CheckRunStatus, DirectoryEntry, IssueComment,
    Mergeable, MergeMethod, PullRequestRefs, PullRequestState, PullRequestStatus, PutOutcome,
    RepoFile, RepoSlug, ReviewDecision, ReviewEvent, WorkflowRun, WorkflowRunConclusion,
    WorkflowRunStatus,
};
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use log::debug;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Direct GitHub API client using octocrab
#[derive(Debug, Clone)]
pub struct OctocrabClient {
    octocrab: Arc<Octocrab>,
}

impl OctocrabClient {
    /// Create a new client with the given octocrab instance
    pub fn new(octocrab: Arc<Octocrab>) -> Self {
        Self { octocrab }
    }

    /// Build a client for public GitHub authenticated with a token
    pub fn from_token(token: String) -> anyhow::Result<Self> {
        let octocrab = Octocrab::builder()
            .personal_token(token)
            .build()
            .context("Failed to build Octocrab client")?;
        Ok(Self::new(Arc::new(octocrab)))
    }

    /// Get a reference to the underlying octocrab instance
    pub fn octocrab(&self) -> &Octocrab {
        &self.octocrab
    }
}

/// Whether an octocrab error is an HTTP error with the given status code
fn is_status(err: &octocrab::Error, code: u16) -> bool {
    match err {
        octocrab::Error::GitHub { source, .. } => source.status_code.as_u16() == code,
        _ => false,
    }
}

// GraphQL response shapes for the PR status query

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlPullRequest {
    state: PullRequestState,
    mergeable: String,
    head_ref_oid: String,
    head_ref_name: String,
    base_ref_name: String,
    review_decision: Option<ReviewDecision>,
    commits: GqlNodes<GqlCommitNode>,
}

#[derive(Debug, Deserialize)]
struct GqlNodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct GqlCommitNode {
    commit: GqlCommit,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlCommit {
    status_check_rollup: Option<GqlRollup>,
}

#[derive(Debug, Deserialize)]
struct GqlRollup {
    contexts: GqlNodes<GqlContext>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum GqlContext {
    CheckRun {
        name: String,
        status: String,
        conclusion: Option<String>,
    },
    StatusContext {
        context: String,
        state: String,
    },
}

impl From<GqlContext> for CheckEntry {
    fn from(context: GqlContext) -> Self {
        match context {
            GqlContext::CheckRun {
                name,
                status,
                conclusion,
            } => CheckEntry {
                name,
                status: CheckRunStatus::from_graphql(&status),
                conclusion: conclusion.as_deref().map(parse_conclusion),
            },
            GqlContext::StatusContext { context, state } => {
                let conclusion = match state.as_str() {
                    "SUCCESS" => Some(CheckConclusion::Success),
                    "FAILURE" => Some(CheckConclusion::Failure),
                    "ERROR" => Some(CheckConclusion::Error),
                    _ => None,
                };
                CheckEntry {
                    name: context,
                    status: if conclusion.is_some() {
                        CheckRunStatus::Completed
                    } else {
                        CheckRunStatus::Pending
                    },
                    conclusion,
                }
            }
        }
    }
}

// REST response shapes

#[derive(Debug, Deserialize)]
struct RestUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RestComment {
    id: u64,
    body: Option<String>,
    user: Option<RestUser>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RestRunsResponse {
    workflow_runs: Vec<RestRun>,
}

#[derive(Debug, Deserialize)]
struct RestRun {
    id: u64,
    status: Option<String>,
    conclusion: Option<String>,
    html_url: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RestContent {
    sha: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestDirEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RestContentRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RestPutResponse {
    content: RestContentRef,
}

#[derive(Debug, Serialize)]
struct PutFileBody<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteFileBody<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Debug, Serialize)]
struct ReviewBody<'a> {
    body: &'a str,
    event: ReviewEvent,
}

fn convert_run(run: RestRun) -> WorkflowRun {
    WorkflowRun {
        id: run.id,
        status: run
            .status
            .as_deref()
            .map(convert_run_status)
            .unwrap_or(WorkflowRunStatus::Queued),
        conclusion: run.conclusion.as_deref().map(convert_run_conclusion),
        html_url: run.html_url,
        created_at: run.created_at,
    }
}

/// Convert workflow run status string from GitHub API to our enum
fn convert_run_status(status: &str) -> WorkflowRunStatus {
    match status {
        "completed" => WorkflowRunStatus::Completed,
        "in_progress" => WorkflowRunStatus::InProgress,
        "waiting" => WorkflowRunStatus::Waiting,
        "pending" => WorkflowRunStatus::Pending,
        "requested" => WorkflowRunStatus::Requested,
        _ => WorkflowRunStatus::Queued,
    }
}

/// Convert workflow run conclusion string from GitHub API to our enum
fn convert_run_conclusion(conclusion: &str) -> WorkflowRunConclusion {
    match conclusion {
        "success" => WorkflowRunConclusion::Success,
        "failure" => WorkflowRunConclusion::Failure,
        "cancelled" => WorkflowRunConclusion::Cancelled,
        "skipped" => WorkflowRunConclusion::Skipped,
        "timed_out" => WorkflowRunConclusion::TimedOut,
        "action_required" => WorkflowRunConclusion::ActionRequired,
        "stale" => WorkflowRunConclusion::Stale,
        "startup_failure" => WorkflowRunConclusion::StartupFailure,
        _ => WorkflowRunConclusion::Neutral,
    }
}

fn status_query(repo: &RepoSlug, pr_number: u64) -> String {
    format!(
        r#"query {{
            repository(owner: "{}", name: "{}") {{
                pullRequest(number: {}) {{
                    state
                    mergeable
                    headRefOid
                    headRefName
                    baseRefName
                    reviewDecision
                    commits(last: 1) {{
                        nodes {{
                            commit {{
                                statusCheckRollup {{
                                    contexts(first: 100) {{
                                        nodes {{
                                            __typename
                                            ... on CheckRun {{ name status conclusion }}
                                            ... on StatusContext {{ context state }}
                                        }}
                                    }}
                                }}
                            }}
                        }}
                    }}
                }}
            }}
        }}"#,
        repo.owner(),
        repo.name(),
        pr_number
    )
}

fn convert_status(pr: GqlPullRequest) -> PullRequestStatus {
    let checks = pr
        .commits
        .nodes
        .into_iter()
        .last()
        .and_then(|node| node.commit.status_check_rollup)
        .map(|rollup| rollup.contexts.nodes.into_iter().map(CheckEntry::from).collect())
        .unwrap_or_default();

    PullRequestStatus {
        state: pr.state,
        mergeable: Mergeable::from_graphql(&pr.mergeable),
        head_sha: pr.head_ref_oid,
        head_ref: pr.head_ref_name,
        base_ref: pr.base_ref_name,
        review_decision: pr.review_decision,
        checks,
    }
}

fn decode_content(encoded: &str) -> anyhow::Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    general_purpose::STANDARD
        .decode(compact)
        .context("Failed to decode base64 file content")
}

#[async_trait]
impl GitHubClient for OctocrabClient {
    async fn fetch_pull_request_status(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
    ) -> anyhow::Result<PullRequestStatus> {
        debug!("Fetching status rollup for {}#{}", repo, pr_number);

        let query = status_query(repo, pr_number);
        let response: serde_json::Value = self.octocrab.graphql(&query).await?;

        if let Some(errors) = response.get("errors") {
            return Err(anyhow::anyhow!("GraphQL error: {}", errors));
        }

        let pr_value = response
            .pointer("/data/repository/pullRequest")
            .cloned()
            .filter(|v| !v.is_null())
            .ok_or_else(|| anyhow::anyhow!("PR {}#{} not found", repo, pr_number))?;
        let pr: GqlPullRequest = serde_json::from_value(pr_value)
            .with_context(|| format!("Unexpected status payload for {}#{}", repo, pr_number))?;

        Ok(convert_status(pr))
    }

    async fn fetch_pull_request_refs(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
    ) -> anyhow::Result<PullRequestRefs> {
        debug!("Fetching refs for {}#{}", repo, pr_number);

        let pr = self
            .octocrab
            .pulls(repo.owner(), repo.name())
            .get(pr_number)
            .await?;

        Ok(PullRequestRefs {
            head_sha: pr.head.sha.clone(),
            head_ref: pr.head.ref_field.clone(),
            base_ref: pr.base.ref_field.clone(),
        })
    }

    async fn fetch_issue_comments(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
    ) -> anyhow::Result<Vec<IssueComment>> {
        const PER_PAGE: usize = 100;
        const MAX_PAGES: u32 = 20;

        let mut comments = Vec::new();
        for page in 1..=MAX_PAGES {
            let route = format!(
                "/repos/{}/{}/issues/{}/comments?per_page={}&page={}",
                repo.owner(),
                repo.name(),
                pr_number,
                PER_PAGE,
                page
            );
            let batch: Vec<RestComment> = self.octocrab.get(route, None::<&()>).await?;
            let batch_len = batch.len();

            comments.extend(batch.into_iter().map(|c| IssueComment {
                id: c.id,
                author: c.user.map(|u| u.login).unwrap_or_default(),
                body: c.body.unwrap_or_default(),
                created_at: c.created_at,
            }));

            if batch_len < PER_PAGE {
                break;
            }
        }

        debug!(
            "Fetched {} comments for {}#{}",
            comments.len(),
            repo,
            pr_number
        );
        Ok(comments)
    }

    async fn create_issue_comment(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
        body: &str,
    ) -> anyhow::Result<()> {
        self.octocrab
            .issues(repo.owner(), repo.name())
            .create_comment(pr_number, body)
            .await?;
        Ok(())
    }

    async fn create_review(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
        event: ReviewEvent,
        body: &str,
    ) -> anyhow::Result<()> {
        let route = format!(
            "/repos/{}/{}/pulls/{}/reviews",
            repo.owner(),
            repo.name(),
            pr_number
        );
        let _: serde_json::Value = self
            .octocrab
            .post(route, Some(&ReviewBody { body, event }))
            .await?;
        Ok(())
    }

    async fn enable_auto_merge(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
        merge_method: MergeMethod,
    ) -> anyhow::Result<()> {
        // GraphQL needs the PR's node_id
        let pr = self
            .octocrab
            .pulls(repo.owner(), repo.name())
            .get(pr_number)
            .await?;

        let node_id = pr
            .node_id
            .ok_or_else(|| anyhow::anyhow!("PR does not have a node_id"))?;

        let query = format!(
            r#"mutation {{
                enablePullRequestAutoMerge(input: {{
                    pullRequestId: "{}",
                    mergeMethod: {}
                }}) {{
                    pullRequest {{
                        autoMergeRequest {{
                            enabledAt
                        }}
                    }}
                }}
            }}"#,
            node_id,
            merge_method.as_graphql()
        );

        let response: serde_json::Value = self.octocrab.graphql(&query).await?;

        if let Some(errors) = response.get("errors") {
            return Err(anyhow::anyhow!("GraphQL error: {}", errors));
        }

        Ok(())
    }

    async fn dispatch_workflow(
        &self,
        repo: &RepoSlug,
        workflow: &str,
        git_ref: &str,
        inputs: &serde_json::Value,
    ) -> anyhow::Result<()> {
        debug!("Dispatching {} on {}@{}", workflow, repo, git_ref);

        self.octocrab
            .actions()
            .create_workflow_dispatch(repo.owner(), repo.name(), workflow, git_ref)
            .inputs(inputs.clone())
            .send()
            .await?;
        Ok(())
    }

    async fn list_workflow_runs(
        &self,
        repo: &RepoSlug,
        workflow: &str,
        limit: u8,
    ) -> anyhow::Result<Vec<WorkflowRun>> {
        let route = format!(
            "/repos/{}/{}/actions/workflows/{}/runs?per_page={}",
            repo.owner(),
            repo.name(),
            workflow,
            limit
        );
        let response: RestRunsResponse = self.octocrab.get(route, None::<&()>).await?;

        Ok(response.workflow_runs.into_iter().map(convert_run).collect())
    }

    async fn fetch_workflow_run(
        &self,
        repo: &RepoSlug,
        run_id: u64,
    ) -> anyhow::Result<WorkflowRun> {
        let route = format!(
            "/repos/{}/{}/actions/runs/{}",
            repo.owner(),
            repo.name(),
            run_id
        );
        let run: RestRun = self.octocrab.get(route, None::<&()>).await?;
        Ok(convert_run(run))
    }

    async fn authenticated_login(&self) -> anyhow::Result<String> {
        let user = self.octocrab.current().user().await?;
        Ok(user.login)
    }

    async fn get_file(
        &self,
        repo: &RepoSlug,
        branch: &str,
        path: &str,
    ) -> anyhow::Result<Option<RepoFile>> {
        let route = format!(
            "/repos/{}/{}/contents/{}?ref={}",
            repo.owner(),
            repo.name(),
            path,
            branch
        );

        let file: RestContent = match self.octocrab.get(route, None::<&()>).await {
            Ok(file) => file,
            Err(e) if is_status(&e, 404) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let content = match file.content {
            Some(encoded) => decode_content(&encoded)?,
            None => Vec::new(),
        };

        Ok(Some(RepoFile {
            content,
            sha: file.sha,
        }))
    }

    async fn put_file(
        &self,
        repo: &RepoSlug,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
        expected_sha: Option<&str>,
    ) -> anyhow::Result<PutOutcome> {
        let route = format!("/repos/{}/{}/contents/{}", repo.owner(), repo.name(), path);
        let body = PutFileBody {
            message,
            content: general_purpose::STANDARD.encode(content),
            branch,
            sha: expected_sha,
        };

        let result: Result<RestPutResponse, octocrab::Error> =
            self.octocrab.put(route, Some(&body)).await;

        match result {
            Ok(response) => Ok(PutOutcome::Written(response.content.sha)),
            // 409: sha does not match; 422: file exists but no sha was supplied
            Err(e) if is_status(&e, 409) || is_status(&e, 422) => {
                debug!("Conditional write to {} rejected: {}", path, e);
                Ok(PutOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_file(
        &self,
        repo: &RepoSlug,
        branch: &str,
        path: &str,
        sha: &str,
        message: &str,
    ) -> anyhow::Result<()> {
        let route = format!("/repos/{}/{}/contents/{}", repo.owner(), repo.name(), path);
        let body = DeleteFileBody {
            message,
            sha,
            branch,
        };

        let result: Result<serde_json::Value, octocrab::Error> =
            self.octocrab.delete(route, Some(&body)).await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_directory(
        &self,
        repo: &RepoSlug,
        branch: &str,
        path: &str,
    ) -> anyhow::Result<Vec<DirectoryEntry>> {
        let route = format!(
            "/repos/{}/{}/contents/{}?ref={}",
            repo.owner(),
            repo.name(),
            path,
            branch
        );

        let entries: Vec<RestDirEntry> = match self.octocrab.get(route, None::<&()>).await {
            Ok(entries) => entries,
            Err(e) if is_status(&e, 404) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(entries
            .into_iter()
            .map(|e| DirectoryEntry {
                is_dir: e.kind == "dir",
                path: e.path,
            })
            .collect())
    }
}
