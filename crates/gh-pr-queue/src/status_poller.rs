//! Check-suite and mergeability polling for a single PR
//!
//! GitHub computes `mergeable` lazily after every push, so the first reads
//! after a mutation usually say `UNKNOWN`. The poller waits out that window
//! with a fixed warm-up and a linear backoff.

use crate::models::PrQueueItem;
use gh_client::{CheckEntry, GitHubClient, Mergeable, PullRequestState, PullRequestStatus};
use gh_pr_queue_config::PollingConfig;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one status evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrStatusReport {
    /// Every relevant check finished with a passing conclusion
    pub all_passed: bool,
    /// At least one relevant check failed
    pub has_failures: bool,
    /// At least one relevant check is queued or in progress
    pub checks_running: bool,
    pub mergeable: Mergeable,
    pub pr_state: PullRequestState,
    pub head_sha: String,
}

/// Result of waiting for checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksOutcome {
    Completed,
    Failed,
    /// Attempt budget exhausted while checks were still running
    Running,
    NoChecks,
}

impl fmt::Display for ChecksOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChecksOutcome::Completed => "COMPLETED",
            ChecksOutcome::Failed => "FAILED",
            ChecksOutcome::Running => "RUNNING",
            ChecksOutcome::NoChecks => "NO_CHECKS",
        };
        f.write_str(s)
    }
}

/// Summary of a check rollup, ignoring `excluded`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    pub total: usize,
    pub all_passed: bool,
    pub has_failures: bool,
    pub running: bool,
}

pub fn evaluate_checks(checks: &[CheckEntry], excluded: &str) -> CheckSummary {
    let relevant: Vec<&CheckEntry> = checks.iter().filter(|c| c.name != excluded).collect();

    let running = relevant.iter().any(|c| c.is_running());
    let all_passed = relevant
        .iter()
        .all(|c| !c.is_running() && c.conclusion.is_some_and(|con| con.is_passing()));
    let has_failures = relevant
        .iter()
        .any(|c| c.conclusion.is_some_and(|con| con.is_failure()));

    CheckSummary {
        total: relevant.len(),
        all_passed,
        has_failures,
        running,
    }
}

pub struct StatusPoller {
    client: Arc<dyn GitHubClient>,
    config: PollingConfig,
    excluded_check: String,
}

impl StatusPoller {
    pub fn new(
        client: Arc<dyn GitHubClient>,
        config: PollingConfig,
        excluded_check: impl Into<String>,
    ) -> Self {
        Self {
            client,
            config,
            excluded_check: excluded_check.into(),
        }
    }

    fn report(&self, status: &PullRequestStatus) -> PrStatusReport {
        let summary = evaluate_checks(&status.checks, &self.excluded_check);
        PrStatusReport {
            all_passed: summary.all_passed,
            has_failures: summary.has_failures,
            checks_running: summary.running,
            mergeable: status.mergeable,
            pr_state: status.state,
            head_sha: status.head_sha.clone(),
        }
    }

    /// Evaluate checks and mergeability
    ///
    /// Waits the warm-up delay, then retries while `mergeable` is `UNKNOWN`
    /// with a backoff of `mergeable_backoff_secs * attempt`. Returns the last
    /// observation (mergeable `UNKNOWN`) once the retries are used up. A
    /// PR that is no longer open is returned after the first query, with
    /// `pr_state` telling the caller why `mergeable` may still be `UNKNOWN`.
    /// A query error fails the whole call.
    pub async fn check_status(&self, pr: &PrQueueItem) -> anyhow::Result<PrStatusReport> {
        debug!(
            "{} Waiting {}s for GitHub to compute merge status",
            pr.label(),
            self.config.warmup_secs
        );
        tokio::time::sleep(Duration::from_secs(self.config.warmup_secs)).await;

        let retries = self.config.mergeable_retries.max(1);
        let mut attempt = 1;
        loop {
            let status = self
                .client
                .fetch_pull_request_status(&pr.repo, pr.pr_number)
                .await?;
            let report = self.report(&status);
            debug!(
                "{} Attempt {}/{}: all_passed={} has_failures={} mergeable={:?} state={:?}",
                pr.label(),
                attempt,
                retries,
                report.all_passed,
                report.has_failures,
                report.mergeable,
                report.pr_state
            );

            // Closed and merged PRs never get a mergeable value
            if report.mergeable != Mergeable::Unknown || report.pr_state != PullRequestState::Open
            {
                return Ok(report);
            }
            if attempt >= retries {
                warn!(
                    "{} Mergeable status still UNKNOWN after {} attempts",
                    pr.label(),
                    retries
                );
                return Ok(report);
            }

            let wait = self.config.mergeable_backoff_secs * u64::from(attempt);
            debug!("{} Waiting {}s before retry", pr.label(), wait);
            tokio::time::sleep(Duration::from_secs(wait)).await;
            attempt += 1;
        }
    }

    /// Poll until no relevant check is running or `timeout` is used up
    ///
    /// Polls every `poll_interval_secs`, never sleeping past `timeout`. An
    /// empty rollup is reported as `NoChecks` only after the grace attempts;
    /// before that, or when the budget ends first, it counts as pending. A
    /// query error fails the call.
    pub async fn wait_for_checks_completion(
        &self,
        pr: &PrQueueItem,
        timeout: Duration,
    ) -> anyhow::Result<ChecksOutcome> {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let grace = self.config.no_checks_grace_attempts;
        let max_attempts = u32::try_from(timeout.as_secs() / interval.as_secs())
            .unwrap_or(u32::MAX)
            .max(1);

        info!(
            "{} Waiting up to {}s for checks to complete",
            pr.label(),
            timeout.as_secs()
        );

        for attempt in 1..=max_attempts {
            let status = self
                .client
                .fetch_pull_request_status(&pr.repo, pr.pr_number)
                .await?;
            let summary = evaluate_checks(&status.checks, &self.excluded_check);

            if summary.total == 0 {
                if attempt > grace {
                    info!("{} No checks found", pr.label());
                    return Ok(ChecksOutcome::NoChecks);
                }
            } else if !summary.running {
                return Ok(if summary.has_failures {
                    info!("{} Checks failed", pr.label());
                    ChecksOutcome::Failed
                } else {
                    info!("{} Checks completed successfully", pr.label());
                    ChecksOutcome::Completed
                });
            }

            debug!(
                "{} Check attempt {}/{}: {} checks, running={}",
                pr.label(),
                attempt,
                max_attempts,
                summary.total,
                summary.running
            );
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        info!(
            "{} Checks still running after {}s",
            pr.label(),
            timeout.as_secs()
        );
        Ok(ChecksOutcome::Running)
    }
}
