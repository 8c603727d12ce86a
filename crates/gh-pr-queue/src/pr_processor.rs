//! Per-PR decision step
//!
//! Each call looks at fresh PR status and takes at most one remediation
//! action. The return value says whether the queue may move past this PR.

use crate::models::{PrQueueItem, PrStatus};
use crate::status_poller::{ChecksOutcome, PrStatusReport, StatusPoller};
use crate::workflow_client::WorkflowClient;
use async_trait::async_trait;
use chrono::Utc;
use gh_client::{Mergeable, PullRequestState};
use gh_pr_queue_config::AppConfig;
use log::{info, warn};
use std::time::Duration;

/// One processing step for the PR under the queue cursor
#[async_trait]
pub trait PrProcessing: Send + Sync {
    /// Returns `true` when the queue should advance past `pr`
    async fn process_pr(&self, pr: &mut PrQueueItem, time_left: Duration) -> bool;
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub max_attempts: u32,
    pub max_fix_attempts: u32,
    pub max_rebase_attempts: u32,
    pub checks_timeout: Duration,
    pub fix_timeout: Duration,
    /// Login the orchestrator comments as; `None` accepts markers from anyone
    pub bot_login: Option<String>,
}

impl ProcessorSettings {
    pub fn from_config(config: &AppConfig, bot_login: Option<String>) -> Self {
        Self {
            max_attempts: config.max_attempts,
            max_fix_attempts: config.max_fix_attempts,
            max_rebase_attempts: config.max_rebase_attempts,
            checks_timeout: Duration::from_secs(config.checks_timeout_minutes * 60),
            fix_timeout: Duration::from_secs(config.fix_timeout_minutes * 60),
            bot_login,
        }
    }
}

pub struct PrProcessor {
    poller: StatusPoller,
    workflows: WorkflowClient,
    settings: ProcessorSettings,
}

#[async_trait]
impl PrProcessing for PrProcessor {
    async fn process_pr(&self, pr: &mut PrQueueItem, time_left: Duration) -> bool {
        pr.last_action_at = Some(Utc::now());
        info!(
            "{} Processing '{}' (status {}, step {})",
            pr.label(),
            pr.pr_title,
            pr.status,
            pr.attempts + 1
        );

        let report = match self.poller.check_status(pr).await {
            Ok(report) => report,
            Err(e) => {
                warn!("{} Status check failed: {:#}", pr.label(), e);
                pr.last_note = Some(format!("status check failed: {:#}", e));
                return false;
            }
        };
        // Only steps that observed the PR count against the step budget
        pr.attempts += 1;

        if report.pr_state != PullRequestState::Open {
            let state = match report.pr_state {
                PullRequestState::Merged => "merged",
                _ => "closed",
            };
            info!("{} Already {}", pr.label(), state);
            pr.set_status(PrStatus::Done, format!("already {}", state));
            return true;
        }

        if pr.attempts > self.settings.max_attempts {
            warn!(
                "{} Giving up after {} processing steps",
                pr.label(),
                self.settings.max_attempts
            );
            pr.set_status(
                PrStatus::Failed,
                format!("unresolved after {} processing steps", self.settings.max_attempts),
            );
            return true;
        }

        self.decide(pr, report, time_left).await
    }
}

impl PrProcessor {
    pub fn new(poller: StatusPoller, workflows: WorkflowClient, settings: ProcessorSettings) -> Self {
        Self {
            poller,
            workflows,
            settings,
        }
    }

    async fn decide(
        &self,
        pr: &mut PrQueueItem,
        mut report: PrStatusReport,
        time_left: Duration,
    ) -> bool {
        let mut waited = false;
        loop {
            if report.all_passed && report.mergeable == Mergeable::Mergeable {
                return self.merge(pr).await;
            }
            if report.has_failures {
                return self.handle_failures(pr, &report, time_left).await;
            }
            if report.mergeable == Mergeable::Conflicting {
                return self.handle_conflict(pr).await;
            }

            if !report.checks_running {
                info!(
                    "{} Not mergeable yet (mergeable={:?})",
                    pr.label(),
                    report.mergeable
                );
                pr.set_status(PrStatus::AwaitingChecks, "waiting for a mergeable state");
                return false;
            }

            pr.set_status(PrStatus::AwaitingChecks, "checks running");
            let budget = time_left.min(self.settings.checks_timeout);
            if waited || budget.is_zero() {
                return false;
            }
            waited = true;

            match self.poller.wait_for_checks_completion(pr, budget).await {
                Ok(ChecksOutcome::Completed | ChecksOutcome::Failed) => {}
                Ok(outcome) => {
                    info!("{} Checks {}; retrying next run", pr.label(), outcome);
                    return false;
                }
                Err(e) => {
                    warn!("{} Waiting for checks failed: {:#}", pr.label(), e);
                    pr.last_note = Some(format!("check polling failed: {:#}", e));
                    return false;
                }
            }

            report = match self.poller.check_status(pr).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("{} Status check failed: {:#}", pr.label(), e);
                    return false;
                }
            };
        }
    }

    async fn merge(&self, pr: &mut PrQueueItem) -> bool {
        info!("{} All checks passed and mergeable", pr.label());
        pr.set_status(PrStatus::Merging, "enabling auto-merge");

        // The slot is freed either way; a failed merge stays open for a human
        if self.workflows.auto_merge_pr(pr).await {
            pr.set_status(PrStatus::Done, "auto-merge enabled");
        } else {
            warn!("{} Auto-merge failed, moving on", pr.label());
            pr.set_status(PrStatus::Done, "auto-merge failed; needs manual merge");
        }
        true
    }

    async fn handle_failures(
        &self,
        pr: &mut PrQueueItem,
        report: &PrStatusReport,
        time_left: Duration,
    ) -> bool {
        let head = report.head_sha.as_str();

        if pr.fix_sha.as_deref() == Some(head) {
            info!("{} Fix already triggered for {}", pr.label(), head);
            return self.follow_up_fix(pr, time_left).await;
        }

        let marker = self
            .workflows
            .latest_fix_marker(pr, self.settings.bot_login.as_deref())
            .await
            .filter(|m| m.sha == head);
        if let Some(marker) = marker {
            info!(
                "{} Found fix marker for {} from an earlier run",
                pr.label(),
                head
            );
            pr.fix_sha = Some(marker.sha);
            pr.fix_triggered_at = Some(marker.created_at);
            pr.fix_run_id = None;
            return self.follow_up_fix(pr, time_left).await;
        }

        if pr.fix_attempts >= self.settings.max_fix_attempts {
            warn!(
                "{} Checks still failing after {} fix attempts",
                pr.label(),
                pr.fix_attempts
            );
            pr.set_status(
                PrStatus::Failed,
                format!("checks failing after {} fix attempts", pr.fix_attempts),
            );
            return true;
        }

        info!("{} Checks failing on {}, triggering fix", pr.label(), head);
        let trigger = self.workflows.trigger_fix_workflow(pr).await;
        if !trigger.dispatched() {
            pr.last_note = Some("fix workflow dispatch failed".to_string());
            return false;
        }

        pr.fix_attempts += 1;
        pr.fix_sha = Some(head.to_string());
        pr.fix_run_id = trigger.run_id();
        pr.fix_triggered_at = Some(Utc::now());
        self.workflows
            .record_fix_trigger(pr, head, trigger.run_id())
            .await;
        pr.set_status(
            PrStatus::FixTriggered,
            format!("fix attempt {} triggered", pr.fix_attempts),
        );

        if let Some(run_id) = trigger.run_id() {
            let budget = time_left.min(self.settings.fix_timeout);
            let outcome = self.workflows.poll_workflow_status(run_id, budget).await;
            pr.last_note = Some(format!("fix run {} {}", run_id, outcome));
        }
        false
    }

    /// A fix was already triggered for the current head
    async fn follow_up_fix(&self, pr: &mut PrQueueItem, time_left: Duration) -> bool {
        let Some(run_id) = pr.fix_run_id else {
            let elapsed = pr
                .fix_triggered_at
                .and_then(|at| (Utc::now() - at).to_std().ok())
                .unwrap_or_default();
            if elapsed >= self.settings.fix_timeout {
                warn!("{} Fix produced no new commit in time", pr.label());
                pr.set_status(PrStatus::Failed, "fix produced no new commit");
                return true;
            }
            pr.set_status(PrStatus::FixTriggered, "waiting for fix run");
            return false;
        };

        let budget = time_left.min(self.settings.fix_timeout);
        let outcome = self.workflows.poll_workflow_status(run_id, budget).await;
        if !outcome.is_finished() {
            pr.set_status(
                PrStatus::FixTriggered,
                format!("fix run {} {}", run_id, outcome),
            );
            return false;
        }

        // The fix may have pushed after the status was read
        let head = self.workflows.get_pr_head_sha(pr).await;
        if head.is_some() && head != pr.fix_sha {
            info!("{} Fix pushed a new commit, re-checking next run", pr.label());
            pr.set_status(PrStatus::AwaitingChecks, "fix pushed a new commit");
            return false;
        }

        warn!(
            "{} Fix run {} finished {} without a new commit",
            pr.label(),
            run_id,
            outcome
        );
        pr.set_status(
            PrStatus::Failed,
            format!("fix run {} finished {} without a new commit", run_id, outcome),
        );
        true
    }

    async fn handle_conflict(&self, pr: &mut PrQueueItem) -> bool {
        if pr.rebase_attempts >= self.settings.max_rebase_attempts {
            warn!(
                "{} Still conflicting after {} rebase attempts",
                pr.label(),
                pr.rebase_attempts
            );
            pr.set_status(
                PrStatus::Failed,
                format!("merge conflict after {} rebase attempts", pr.rebase_attempts),
            );
            return true;
        }

        pr.rebase_attempts += 1;
        info!(
            "{} Merge conflict, rebasing (attempt {})",
            pr.label(),
            pr.rebase_attempts
        );
        if self.workflows.trigger_rebase(pr).await {
            pr.set_status(PrStatus::Rebasing, "rebase requested");
        } else {
            pr.last_note = Some("rebase failed".to_string());
        }
        false
    }
}
