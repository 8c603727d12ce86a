//! Recording mocks of the GitHub and git seams

use crate::git::GitRunner;
use async_trait::async_trait;
use chrono::Utc;
use gh_client::{
    CheckEntry, DirectoryEntry, GitHubClient, IssueComment, MergeMethod, Mergeable,
    PullRequestRefs, PullRequestState, PullRequestStatus, PutOutcome, RepoFile, RepoSlug,
    ReviewDecision, ReviewEvent, WorkflowRun, WorkflowRunConclusion, WorkflowRunStatus,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Status of an open PR on branch `deps/update` against `main`
pub fn open_status(
    head_sha: &str,
    mergeable: Mergeable,
    checks: Vec<CheckEntry>,
) -> PullRequestStatus {
    PullRequestStatus {
        state: PullRequestState::Open,
        mergeable,
        head_sha: head_sha.to_string(),
        head_ref: "deps/update".to_string(),
        base_ref: "main".to_string(),
        review_decision: None,
        checks,
    }
}

type RunState = (WorkflowRunStatus, Option<WorkflowRunConclusion>);

/// In-memory GitHub
///
/// PR statuses are scripted per PR number: each fetch consumes one entry
/// and the last entry repeats forever.
pub struct MockGitHubClient {
    pub login: String,
    statuses: Mutex<HashMap<u64, VecDeque<PullRequestStatus>>>,
    comments: Mutex<HashMap<u64, Vec<IssueComment>>>,
    runs: Mutex<Vec<(String, WorkflowRun)>>,
    run_progress: Mutex<HashMap<u64, VecDeque<RunState>>>,
    files: Mutex<BTreeMap<String, RepoFile>>,
    next_id: AtomicU64,
    /// State new workflow runs start in
    pub new_run_state: Mutex<RunState>,
    pub fail_status: Mutex<bool>,
    pub fail_comments: Mutex<bool>,
    pub fail_review: Mutex<bool>,
    pub fail_auto_merge: Mutex<bool>,
    pub fail_dispatch: Mutex<bool>,
    pub fail_login: Mutex<bool>,
    /// Call log: (method, args summary)
    pub calls: Mutex<Vec<(String, String)>>,
}

impl Default for MockGitHubClient {
    fn default() -> Self {
        Self {
            login: "queue-bot[bot]".to_string(),
            statuses: Mutex::new(HashMap::new()),
            comments: Mutex::new(HashMap::new()),
            runs: Mutex::new(Vec::new()),
            run_progress: Mutex::new(HashMap::new()),
            files: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(100),
            new_run_state: Mutex::new((WorkflowRunStatus::Queued, None)),
            fail_status: Mutex::new(false),
            fail_comments: Mutex::new(false),
            fail_review: Mutex::new(false),
            fail_auto_merge: Mutex::new(false),
            fail_dispatch: Mutex::new(false),
            fail_login: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockGitHubClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, method: &str, args: String) {
        self.calls.lock().unwrap().push((method.to_string(), args));
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Append a status to PR `number`'s script
    pub fn push_status(&self, number: u64, status: PullRequestStatus) {
        self.statuses
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push_back(status);
    }

    /// Replace PR `number`'s script with a single repeating status
    pub fn set_status(&self, number: u64, status: PullRequestStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(number, VecDeque::from([status]));
    }

    pub fn add_comment(&self, number: u64, author: &str, body: &str) {
        let id = self.next_id();
        self.comments
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push(IssueComment {
                id,
                author: author.to_string(),
                body: body.to_string(),
                created_at: Utc::now(),
            });
    }

    pub fn comments(&self, number: u64) -> Vec<IssueComment> {
        self.comments
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    /// Script the states a run reports on successive fetches
    pub fn set_run_progress(&self, run_id: u64, states: Vec<RunState>) {
        self.run_progress
            .lock()
            .unwrap()
            .insert(run_id, states.into());
    }

    /// Register an existing run of `workflow`
    pub fn add_run(&self, workflow: &str, run: WorkflowRun) {
        self.runs.lock().unwrap().push((workflow.to_string(), run));
    }

    pub fn calls_named(&self, method: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).map(|f| f.content.clone())
    }

    fn current_status(&self, number: u64) -> anyhow::Result<PullRequestStatus> {
        let mut statuses = self.statuses.lock().unwrap();
        let script = statuses
            .get_mut(&number)
            .ok_or_else(|| anyhow::anyhow!("mock: no status for PR #{}", number))?;
        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        status.ok_or_else(|| anyhow::anyhow!("mock: empty status script for PR #{}", number))
    }

    fn peek_status(&self, number: u64) -> anyhow::Result<PullRequestStatus> {
        self.statuses
            .lock()
            .unwrap()
            .get(&number)
            .and_then(|s| s.front().cloned())
            .ok_or_else(|| anyhow::anyhow!("mock: no status for PR #{}", number))
    }
}

#[async_trait]
impl GitHubClient for MockGitHubClient {
    async fn fetch_pull_request_status(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
    ) -> anyhow::Result<PullRequestStatus> {
        self.record("fetch_pull_request_status", format!("{}#{}", repo, pr_number));
        if *self.fail_status.lock().unwrap() {
            anyhow::bail!("mock: status query failed");
        }
        self.current_status(pr_number)
    }

    async fn fetch_pull_request_refs(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
    ) -> anyhow::Result<PullRequestRefs> {
        self.record("fetch_pull_request_refs", format!("{}#{}", repo, pr_number));
        let status = self.peek_status(pr_number)?;
        Ok(PullRequestRefs {
            head_sha: status.head_sha,
            head_ref: status.head_ref,
            base_ref: status.base_ref,
        })
    }

    async fn fetch_issue_comments(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
    ) -> anyhow::Result<Vec<IssueComment>> {
        self.record("fetch_issue_comments", format!("{}#{}", repo, pr_number));
        if *self.fail_comments.lock().unwrap() {
            anyhow::bail!("mock: comments unavailable");
        }
        Ok(self.comments(pr_number))
    }

    async fn create_issue_comment(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
        body: &str,
    ) -> anyhow::Result<()> {
        self.record(
            "create_issue_comment",
            format!("{}#{}: {}", repo, pr_number, body),
        );
        if *self.fail_comments.lock().unwrap() {
            anyhow::bail!("mock: comment rejected");
        }
        self.add_comment(pr_number, &self.login, body);
        Ok(())
    }

    async fn create_review(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
        event: ReviewEvent,
        body: &str,
    ) -> anyhow::Result<()> {
        self.record(
            "create_review",
            format!("{}#{}: {:?} {}", repo, pr_number, event, body),
        );
        if *self.fail_review.lock().unwrap() {
            anyhow::bail!("mock: review rejected");
        }
        if event == ReviewEvent::Approve {
            let mut statuses = self.statuses.lock().unwrap();
            if let Some(script) = statuses.get_mut(&pr_number) {
                for status in script.iter_mut() {
                    status.review_decision = Some(ReviewDecision::Approved);
                }
            }
        }
        Ok(())
    }

    async fn enable_auto_merge(
        &self,
        repo: &RepoSlug,
        pr_number: u64,
        merge_method: MergeMethod,
    ) -> anyhow::Result<()> {
        self.record(
            "enable_auto_merge",
            format!("{}#{}: {}", repo, pr_number, merge_method.as_graphql()),
        );
        if *self.fail_auto_merge.lock().unwrap() {
            anyhow::bail!("mock: auto-merge not allowed");
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
        self.record(
            "dispatch_workflow",
            format!("{} {}@{} {}", repo, workflow, git_ref, inputs),
        );
        if *self.fail_dispatch.lock().unwrap() {
            anyhow::bail!("mock: dispatch rejected");
        }

        let id = self.next_id();
        let (status, conclusion) = *self.new_run_state.lock().unwrap();
        self.add_run(
            workflow,
            WorkflowRun {
                id,
                status,
                conclusion,
                html_url: format!("https://github.com/{}/actions/runs/{}", repo, id),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_workflow_runs(
        &self,
        repo: &RepoSlug,
        workflow: &str,
        limit: u8,
    ) -> anyhow::Result<Vec<WorkflowRun>> {
        self.record("list_workflow_runs", format!("{} {}", repo, workflow));
        let runs = self.runs.lock().unwrap();
        Ok(runs
            .iter()
            .rev()
            .filter(|(w, _)| w == workflow)
            .map(|(_, run)| run.clone())
            .take(limit as usize)
            .collect())
    }

    async fn fetch_workflow_run(&self, repo: &RepoSlug, run_id: u64) -> anyhow::Result<WorkflowRun> {
        self.record("fetch_workflow_run", format!("{} {}", repo, run_id));

        let progressed = {
            let mut progress = self.run_progress.lock().unwrap();
            progress.get_mut(&run_id).and_then(|script| {
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().copied()
                }
            })
        };

        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .map(|(_, run)| run)
            .find(|run| run.id == run_id)
            .ok_or_else(|| anyhow::anyhow!("mock: run {} not found", run_id))?;
        if let Some((status, conclusion)) = progressed {
            run.status = status;
            run.conclusion = conclusion;
        }
        Ok(run.clone())
    }

    async fn authenticated_login(&self) -> anyhow::Result<String> {
        if *self.fail_login.lock().unwrap() {
            anyhow::bail!("mock: resource not accessible by integration");
        }
        Ok(self.login.clone())
    }

    async fn get_file(
        &self,
        _repo: &RepoSlug,
        _branch: &str,
        path: &str,
    ) -> anyhow::Result<Option<RepoFile>> {
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    async fn put_file(
        &self,
        _repo: &RepoSlug,
        _branch: &str,
        path: &str,
        content: &[u8],
        _message: &str,
        expected_sha: Option<&str>,
    ) -> anyhow::Result<PutOutcome> {
        let mut files = self.files.lock().unwrap();
        let matches = match (expected_sha, files.get(path)) {
            (None, None) => true,
            (Some(expected), Some(current)) => expected == current.sha,
            _ => false,
        };
        if !matches {
            return Ok(PutOutcome::Conflict);
        }

        let sha = format!("blob{}", self.next_id());
        files.insert(
            path.to_string(),
            RepoFile {
                content: content.to_vec(),
                sha: sha.clone(),
            },
        );
        Ok(PutOutcome::Written(sha))
    }

    async fn delete_file(
        &self,
        _repo: &RepoSlug,
        _branch: &str,
        path: &str,
        sha: &str,
        _message: &str,
    ) -> anyhow::Result<()> {
        let mut files = self.files.lock().unwrap();
        match files.get(path) {
            Some(current) if current.sha == sha => {
                files.remove(path);
                Ok(())
            }
            Some(_) => anyhow::bail!("mock: sha mismatch deleting {}", path),
            None => anyhow::bail!("mock: {} not found", path),
        }
    }

    async fn list_directory(
        &self,
        _repo: &RepoSlug,
        _branch: &str,
        path: &str,
    ) -> anyhow::Result<Vec<DirectoryEntry>> {
        let files = self.files.lock().unwrap();
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();

        for key in files.keys() {
            let relative = if path.is_empty() {
                Some(key.as_str())
            } else {
                key.strip_prefix(path).and_then(|rest| rest.strip_prefix('/'))
            };
            let Some(relative) = relative else {
                continue;
            };
            let full = |segment: &str| {
                if path.is_empty() {
                    segment.to_string()
                } else {
                    format!("{}/{}", path, segment)
                }
            };
            match relative.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(full(dir));
                }
                None => entries.push(DirectoryEntry {
                    path: full(relative),
                    is_dir: false,
                }),
            }
        }

        entries.extend(dirs.into_iter().map(|path| DirectoryEntry { path, is_dir: true }));
        Ok(entries)
    }
}

/// Git runner that only records invocations
#[derive(Default)]
pub struct MockGit {
    /// Subcommand that should fail, e.g. "rebase"
    pub fail_on: Mutex<Option<String>>,
    /// Recorded invocations as space-joined argument lists
    pub calls: Mutex<Vec<String>>,
}

impl MockGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(subcommand: &str) -> Self {
        Self {
            fail_on: Mutex::new(Some(subcommand.to_string())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitRunner for MockGit {
    async fn run(&self, _dir: &Path, args: &[&str]) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(args.join(" "));
        let fail_on = self.fail_on.lock().unwrap().clone();
        if let Some(subcommand) = fail_on {
            if args.first() == Some(&subcommand.as_str()) {
                anyhow::bail!("mock: git {} failed", subcommand);
            }
        }
        Ok(String::new())
    }
}
