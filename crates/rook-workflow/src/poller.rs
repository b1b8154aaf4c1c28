//! Periodic scan of assigned issues, diffed against persisted records.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rook_github::{GithubIssue, RepoRef};
use rook_state::{IssueRecord, IssueStatus};

use crate::agent::{IssueAgent, WorkflowOutcome};
use crate::dispatch::{IssueKey, IssueLocks};
use crate::heuristics::ReplyClassifier;
use crate::prompts::is_format_fallback_comment;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_STUCK_THRESHOLD: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
/// Public struct `PollerConfig` used across Rook components.
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub repositories: Vec<RepoRef>,
    pub stuck_threshold: Duration,
}

impl PollerConfig {
    pub fn new(repositories: Vec<RepoRef>) -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            repositories,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Counters for one poll tick.
pub struct PollCycleReport {
    pub repositories_scanned: usize,
    pub issues_seen: usize,
    pub new_issues: usize,
    pub comment_dispatches: usize,
    pub review_dispatches: usize,
    pub reconciliations: usize,
    pub stuck_recoveries: usize,
    pub resumed_ready: usize,
    pub skipped_busy: usize,
    pub failed_repositories: usize,
    pub failed_issues: usize,
}

/// Status a waiting record should be forced into, judged from the agent's own
/// latest comment. `None` means leave it alone.
pub fn reconcile_status(
    record: &IssueRecord,
    latest_own_comment: Option<&str>,
    classifier: &ReplyClassifier,
) -> Option<IssueStatus> {
    if record.status != IssueStatus::WaitingForClarification {
        return None;
    }
    let comment = latest_own_comment?;
    if is_format_fallback_comment(comment) {
        return None;
    }
    classifier
        .signals_ready(comment)
        .then_some(IssueStatus::ReadyToImplement)
}

/// True once an `implementing` record has gone quiet for longer than `threshold`.
pub fn is_implementation_stuck(
    record: &IssueRecord,
    now: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    if record.status != IssueStatus::Implementing {
        return false;
    }
    let Ok(threshold) = chrono::Duration::from_std(threshold) else {
        return false;
    };
    now.signed_duration_since(record.updated_at) > threshold
}

/// Joins comment bodies into one user turn, oldest first.
fn coalesce_comments(mut comments: Vec<(DateTime<Utc>, String)>) -> Option<String> {
    comments.retain(|(_, body)| !body.trim().is_empty());
    if comments.is_empty() {
        return None;
    }
    comments.sort_by_key(|(created_at, _)| *created_at);
    Some(
        comments
            .into_iter()
            .map(|(_, body)| body)
            .collect::<Vec<_>>()
            .join("\n\n"),
    )
}

/// Polls the configured repositories and dispatches workflow steps.
pub struct IssuePoller {
    agent: Arc<IssueAgent>,
    locks: IssueLocks,
    config: PollerConfig,
}

impl IssuePoller {
    pub fn new(agent: Arc<IssueAgent>, locks: IssueLocks, config: PollerConfig) -> Self {
        Self {
            agent,
            locks,
            config,
        }
    }

    /// Ticks immediately, then every `poll_interval` until Ctrl-C. With
    /// `once`, returns after the first tick and fails if any part of it failed.
    pub async fn run(&self, once: bool) -> Result<()> {
        tracing::info!(
            identity = self.agent.identity(),
            repositories = self.config.repositories.len(),
            interval_secs = self.config.poll_interval.as_secs(),
            "issue poller started"
        );
        loop {
            let report = self.poll_once().await;
            tracing::info!(
                repositories = report.repositories_scanned,
                issues = report.issues_seen,
                new_issues = report.new_issues,
                comments = report.comment_dispatches,
                reviews = report.review_dispatches,
                reconciliations = report.reconciliations,
                stuck_recoveries = report.stuck_recoveries,
                resumed_ready = report.resumed_ready,
                skipped_busy = report.skipped_busy,
                failed_repositories = report.failed_repositories,
                failed_issues = report.failed_issues,
                "poll cycle complete"
            );
            if once {
                let failures = report
                    .failed_repositories
                    .saturating_add(report.failed_issues);
                if failures > 0 {
                    bail!("poll cycle finished with {failures} failure(s)");
                }
                return Ok(());
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("issue poller shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// One tick over every repository. Failures are counted and logged, never
    /// propagated.
    pub async fn poll_once(&self) -> PollCycleReport {
        let mut report = PollCycleReport::default();
        for repo in &self.config.repositories {
            report.repositories_scanned = report.repositories_scanned.saturating_add(1);
            let issues = match self
                .agent
                .tracker()
                .list_assigned_open_issues(repo, self.agent.identity())
                .await
            {
                Ok(issues) => issues,
                Err(error) => {
                    report.failed_repositories = report.failed_repositories.saturating_add(1);
                    tracing::warn!(
                        repo = %repo,
                        error = %format!("{error:#}"),
                        "failed to list assigned issues"
                    );
                    continue;
                }
            };
            tracing::debug!(repo = %repo, count = issues.len(), "assigned issues listed");

            for issue in &issues {
                report.issues_seen = report.issues_seen.saturating_add(1);
                match self.process_issue(repo, issue, &mut report).await {
                    Ok(Some(outcome)) => tracing::info!(
                        repo = %repo,
                        issue = issue.number,
                        outcome = outcome.label(),
                        "issue processed"
                    ),
                    Ok(None) => {}
                    Err(error) => {
                        report.failed_issues = report.failed_issues.saturating_add(1);
                        tracing::warn!(
                            repo = %repo,
                            issue = issue.number,
                            error = %format!("{error:#}"),
                            "failed to process issue"
                        );
                    }
                }
            }
        }
        report
    }

    async fn process_issue(
        &self,
        repo: &RepoRef,
        issue: &GithubIssue,
        report: &mut PollCycleReport,
    ) -> Result<Option<WorkflowOutcome>> {
        let Some(_guard) = self.locks.try_acquire(IssueKey::new(repo, issue.number)) else {
            report.skipped_busy = report.skipped_busy.saturating_add(1);
            tracing::debug!(repo = %repo, issue = issue.number, "issue busy; skipping this tick");
            return Ok(None);
        };

        let record = self
            .agent
            .store()
            .get(&repo.owner, &repo.name, issue.number)
            .context("failed to load issue record")?;
        let Some(record) = record else {
            report.new_issues = report.new_issues.saturating_add(1);
            tracing::info!(repo = %repo, issue = issue.number, title = %issue.title, "new issue detected");
            return self
                .agent
                .handle_issue_assignment(repo, issue.number)
                .await
                .map(Some);
        };

        match record.status {
            IssueStatus::Analyzing => {
                report.new_issues = report.new_issues.saturating_add(1);
                self.agent
                    .handle_issue_assignment(repo, issue.number)
                    .await
                    .map(Some)
            }
            IssueStatus::WaitingForClarification => {
                self.process_waiting(repo, record, report).await
            }
            IssueStatus::ReadyToImplement => {
                report.resumed_ready = report.resumed_ready.saturating_add(1);
                tracing::info!(repo = %repo, issue = issue.number, "resuming ready issue");
                self.agent
                    .start_implementation(repo, issue.number)
                    .await
                    .map(Some)
            }
            IssueStatus::Implementing => {
                if !is_implementation_stuck(&record, Utc::now(), self.config.stuck_threshold) {
                    return Ok(None);
                }
                report.stuck_recoveries = report.stuck_recoveries.saturating_add(1);
                tracing::warn!(
                    repo = %repo,
                    issue = issue.number,
                    last_update = %record.updated_at,
                    "implementation looks stuck; restarting"
                );
                let mut record = record;
                record.status = IssueStatus::ReadyToImplement;
                self.agent
                    .store()
                    .save(&record)
                    .context("failed to reset stuck record")?;
                self.agent
                    .start_implementation(repo, issue.number)
                    .await
                    .map(Some)
            }
            IssueStatus::PrCreated | IssueStatus::Reviewing => {
                self.process_review(repo, &record, report).await
            }
            IssueStatus::Completed => Ok(None),
        }
    }

    async fn process_waiting(
        &self,
        repo: &RepoRef,
        mut record: IssueRecord,
        report: &mut PollCycleReport,
    ) -> Result<Option<WorkflowOutcome>> {
        let comments = self
            .agent
            .tracker()
            .list_issue_comments(repo, record.issue_number)
            .await
            .context("failed to list issue comments")?;
        let latest_own = comments
            .iter()
            .rev()
            .find(|comment| self.agent.is_self(&comment.user.login))
            .map(|comment| comment.body_text());
        let fresh = coalesce_comments(
            comments
                .iter()
                .filter(|comment| !self.agent.is_self(&comment.user.login))
                .filter(|comment| comment.created_at > record.updated_at)
                .map(|comment| (comment.created_at, comment.body_text().to_string()))
                .collect(),
        );

        if let Some(status) = reconcile_status(&record, latest_own, self.agent.classifier()) {
            report.reconciliations = report.reconciliations.saturating_add(1);
            tracing::info!(
                repo = %repo,
                issue = record.issue_number,
                "latest reply signals readiness; moving to implementation"
            );
            if let Some(body) = fresh {
                record.push_user(body);
            }
            record.status = status;
            self.agent
                .store()
                .save(&record)
                .context("failed to save reconciled record")?;
            return self
                .agent
                .start_implementation(repo, record.issue_number)
                .await
                .map(Some);
        }

        let Some(body) = fresh else {
            return Ok(None);
        };
        report.comment_dispatches = report.comment_dispatches.saturating_add(1);
        tracing::info!(repo = %repo, issue = record.issue_number, "new comments detected");
        self.agent
            .handle_issue_comment(repo, record.issue_number, &body)
            .await
            .map(Some)
    }

    async fn process_review(
        &self,
        repo: &RepoRef,
        record: &IssueRecord,
        report: &mut PollCycleReport,
    ) -> Result<Option<WorkflowOutcome>> {
        let Some(pull_number) = record.pull_request_number else {
            return Ok(None);
        };
        let tracker = self.agent.tracker();
        let review_comments = tracker
            .list_review_comments(repo, pull_number)
            .await
            .context("failed to list review comments")?;
        let conversation_comments = tracker
            .list_issue_comments(repo, pull_number)
            .await
            .context("failed to list pull request comments")?;

        let mut fresh = review_comments
            .iter()
            .filter(|comment| !self.agent.is_self(&comment.user.login))
            .filter(|comment| comment.created_at > record.updated_at)
            .map(|comment| {
                let body = match comment.path.as_deref() {
                    Some(path) if !path.is_empty() => format!("`{path}`: {}", comment.body_text()),
                    _ => comment.body_text().to_string(),
                };
                (comment.created_at, body)
            })
            .collect::<Vec<_>>();
        fresh.extend(
            conversation_comments
                .iter()
                .filter(|comment| !self.agent.is_self(&comment.user.login))
                .filter(|comment| comment.created_at > record.updated_at)
                .map(|comment| (comment.created_at, comment.body_text().to_string())),
        );
        let Some(feedback) = coalesce_comments(fresh) else {
            return Ok(None);
        };

        report.review_dispatches = report.review_dispatches.saturating_add(1);
        tracing::info!(
            repo = %repo,
            issue = record.issue_number,
            pull = pull_number,
            "new review feedback detected"
        );
        self.agent
            .handle_review_comment(repo, pull_number, record.issue_number, &feedback)
            .await
            .map(Some)
    }
}
