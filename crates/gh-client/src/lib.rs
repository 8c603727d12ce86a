//! GitHub API client for the PR queue
//!
//! This crate provides a trait-based GitHub API client. The orchestrator only
//! ever talks to `dyn GitHubClient`, so tests swap in a recording mock while
//! production uses the octocrab-backed implementation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              GitHubClient trait                 │
//! │  - fetch_pull_request_status()                  │
//! │  - dispatch_workflow() / fetch_workflow_run()   │
//! │  - get_file() / put_file()                      │
//! └─────────────────────────────────────────────────┘
//!                        │
//!                        ▼
//!              ┌─────────────────┐
//!              │ OctocrabClient  │
//!              │ (REST + GraphQL)│
//!              └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use gh_client::{GitHubClient, OctocrabClient, RepoSlug, TokenResolver};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let token = TokenResolver::new().get_token().await?;
//! let client = OctocrabClient::from_token(token)?;
//!
//! let repo: RepoSlug = "octo/widgets".parse()?;
//! let status = client.fetch_pull_request_status(&repo, 42).await?;
//! println!("{} is {}", repo, status.mergeable);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod octocrab_client;
pub mod token;
pub mod types;

pub use client::GitHubClient;
pub use octocrab_client::OctocrabClient;
pub use token::TokenResolver;
pub use types::{
    parse_conclusion, CheckConclusion, CheckEntry, CheckRunStatus, DirectoryEntry, IssueComment,
    MergeMethod, Mergeable, PullRequestRefs, PullRequestState, PullRequestStatus, PutOutcome,
    RepoFile, RepoSlug, ReviewDecision, ReviewEvent, WorkflowRun, WorkflowRunConclusion,
    WorkflowRunStatus,
};

// Re-export octocrab so consumers don't need to depend on it directly
pub use octocrab;
