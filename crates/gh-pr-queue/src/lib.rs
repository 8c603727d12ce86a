//! Sequential per-repository queue for bot pull requests
//!
//! Each scheduled invocation works through the bot PRs of one repository in
//! order: merge what is green, dispatch a fix run for failing checks, rebase
//! conflicts, and otherwise wait. Progress is checkpointed after every step
//! so the next invocation resumes where this one stopped.
//!
//! ```text
//! Runner ─► QueueManager ─► PrProcessor ─┬─► StatusPoller ──┐
//!   │             │                      └─► WorkflowClient ┼─► GitHubClient
//!   │             ▼                                │        │
//!   └──────► StateManager ─► BlobStore             └─► GitRunner
//! ```

pub mod error;
pub mod git;
pub mod input;
pub mod logger;
pub mod models;
pub mod pr_processor;
pub mod queue_manager;
pub mod runner;
pub mod state_manager;
pub mod status_poller;
pub mod store;
pub mod workflow_client;

#[cfg(test)]
pub mod test_support;

pub use error::{InputError, StateError, StoreError};
pub use models::{PrQueueItem, PrStatus, QueueState, RepoQueue};
pub use runner::{ProcessOutcome, ProcessRequest, Runner};
