//! The per-issue state machine.
//!
//! Every handler loads the record, runs one assistant turn, issues its tracker
//! side effects, and persists the resulting status before returning. Chained
//! transitions (analysis straight into implementation) re-read the record.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rook_ai::{ChatRequest, ChatResponse, LlmClient, Message, RookAiError};
use rook_github::{GithubIssue, IssueTracker, NewPullRequest, RepoRef};
use rook_state::{ConversationRole, IssueRecord, IssueStateStore, IssueStatus};

use crate::change_set::parse_change_set;
use crate::heuristics::{
    classify_assistant_error, is_branch_exists_error, is_empty_repository_error, ReplyClassifier,
};
use crate::prompts;
use crate::retry::{retry_with_backoff, CodegenRetryPolicy, Sleeper, TokioSleeper};

pub const DEFAULT_MODEL: &str = "openrouter/auto";
pub const DEFAULT_MAX_TOKENS: u32 = 8096;
pub const DEFAULT_BRANCH_PREFIX: &str = "rook";
const FALLBACK_DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone)]
/// Tunables for `IssueAgent`.
pub struct IssueAgentSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub branch_prefix: String,
    pub retry_policy: CodegenRetryPolicy,
    pub classifier: ReplyClassifier,
}

impl Default for IssueAgentSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            retry_policy: CodegenRetryPolicy::default(),
            classifier: ReplyClassifier::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What a workflow handler did.
pub enum WorkflowOutcome {
    AwaitingClarification,
    Replied { status: IssueStatus },
    PullRequestOpened { number: u64 },
    CommittedDirectly { branch: String },
    ReturnedForClarification,
    RevisionApplied { pull_number: u64, files: usize },
    Skipped { reason: String },
}

impl WorkflowOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AwaitingClarification => "awaiting_clarification",
            Self::Replied { .. } => "replied",
            Self::PullRequestOpened { .. } => "pull_request_opened",
            Self::CommittedDirectly { .. } => "committed_directly",
            Self::ReturnedForClarification => "returned_for_clarification",
            Self::RevisionApplied { .. } => "revision_applied",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Drives one issue at a time through analysis, implementation, and review.
pub struct IssueAgent {
    tracker: Arc<dyn IssueTracker>,
    llm: Arc<dyn LlmClient>,
    store: Arc<IssueStateStore>,
    identity: String,
    settings: IssueAgentSettings,
    sleeper: Arc<dyn Sleeper>,
}

impl IssueAgent {
    /// `identity` is the tracker login the agent acts as, resolved once by the caller.
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        llm: Arc<dyn LlmClient>,
        store: Arc<IssueStateStore>,
        identity: impl Into<String>,
        settings: IssueAgentSettings,
    ) -> Self {
        Self {
            tracker,
            llm,
            store,
            identity: identity.into(),
            settings,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn tracker(&self) -> &Arc<dyn IssueTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<IssueStateStore> {
        &self.store
    }

    pub fn classifier(&self) -> &ReplyClassifier {
        &self.settings.classifier
    }

    pub fn is_self(&self, login: &str) -> bool {
        login.eq_ignore_ascii_case(&self.identity)
    }

    /// First observation of an assignment (or a record left in `analyzing`).
    pub async fn handle_issue_assignment(
        &self,
        repo: &RepoRef,
        issue_number: u64,
    ) -> Result<WorkflowOutcome> {
        tracing::info!(repo = %repo, issue = issue_number, "analyzing issue");
        let issue = self
            .tracker
            .get_issue(repo, issue_number)
            .await
            .context("failed to get issue")?;

        let mut record = match self.load(repo, issue_number)? {
            Some(record) if record.status != IssueStatus::Analyzing => {
                return Ok(WorkflowOutcome::Skipped {
                    reason: format!("issue already tracked as {}", record.status),
                });
            }
            Some(record) => record,
            None => self.seed_record(repo, &issue).await?,
        };

        let (system_prompt, messages) = if record.conversation.len() > 1 {
            (
                prompts::CONFIRM_SYSTEM_PROMPT,
                conversation_messages(&record),
            )
        } else {
            (
                prompts::ANALYZE_SYSTEM_PROMPT,
                vec![Message::user(prompts::analysis_request(
                    &issue.title,
                    issue.body_text(),
                ))],
            )
        };
        let response = self
            .converse(system_prompt, messages)
            .await
            .context("failed to analyze issue")?;
        let reply = absorb_reply(&mut record, response);

        if record.conversation.len() <= 2 {
            self.tracker
                .create_issue_comment(repo, issue_number, &prompts::analysis_comment(&reply))
                .await
                .context("failed to post analysis comment")?;
        }

        let asks_question = self.settings.classifier.asks_question(&reply);
        record.status = if asks_question {
            IssueStatus::WaitingForClarification
        } else {
            IssueStatus::ReadyToImplement
        };
        self.persist(&record)?;
        tracing::info!(
            repo = %repo,
            issue = issue_number,
            status = %record.status,
            "analysis complete"
        );

        if asks_question {
            return Ok(WorkflowOutcome::AwaitingClarification);
        }
        self.start_implementation(repo, issue_number).await
    }

    /// A human comment on a tracked issue. The reply is always posted.
    pub async fn handle_issue_comment(
        &self,
        repo: &RepoRef,
        issue_number: u64,
        body: &str,
    ) -> Result<WorkflowOutcome> {
        let Some(mut record) = self.load(repo, issue_number)? else {
            return Ok(WorkflowOutcome::Skipped {
                reason: "issue is not tracked".to_string(),
            });
        };
        tracing::info!(
            repo = %repo,
            issue = issue_number,
            status = %record.status,
            "processing issue comment"
        );

        record.push_user(body);
        let response = self
            .converse(
                prompts::COMMENT_REPLY_SYSTEM_PROMPT,
                conversation_messages(&record),
            )
            .await
            .context("failed to get comment reply")?;
        let reply = absorb_reply(&mut record, response);

        self.tracker
            .create_issue_comment(repo, issue_number, &reply)
            .await
            .context("failed to post comment reply")?;

        if record.status == IssueStatus::WaitingForClarification
            && !self.settings.classifier.asks_question(&reply)
        {
            record.status = IssueStatus::ReadyToImplement;
            self.persist(&record)?;
            return self.start_implementation(repo, issue_number).await;
        }

        self.persist(&record)?;
        Ok(match record.status {
            IssueStatus::WaitingForClarification => WorkflowOutcome::AwaitingClarification,
            status => WorkflowOutcome::Replied { status },
        })
    }

    /// Implements the issue: branch, generate, apply, then PR or direct commit.
    pub async fn start_implementation(
        &self,
        repo: &RepoRef,
        issue_number: u64,
    ) -> Result<WorkflowOutcome> {
        let mut record = self
            .load(repo, issue_number)?
            .ok_or_else(|| anyhow!("no record for {repo}#{issue_number}"))?;
        record.status = IssueStatus::Implementing;
        record = self.persist(&record)?;
        tracing::info!(repo = %repo, issue = issue_number, "starting implementation");

        self.tracker
            .create_issue_comment(repo, issue_number, prompts::STARTING_COMMENT)
            .await
            .context("failed to post starting comment")?;

        let repository = self
            .tracker
            .get_repository(repo)
            .await
            .context("failed to get repository")?;
        let default_branch = repository
            .default_branch
            .filter(|branch| !branch.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_DEFAULT_BRANCH.to_string());

        let work_branch = match record.work_branch() {
            Some(branch) => {
                tracing::info!(repo = %repo, issue = issue_number, branch, "reusing work branch");
                branch.to_string()
            }
            None => {
                let branch = self.prepare_branch(repo, issue_number, &default_branch).await?;
                record.branch_name = Some(branch.clone());
                record = self.persist(&record)?;
                branch
            }
        };

        let system_prompt = prompts::codegen_system_prompt(
            &repo.as_slug(),
            repository.language.as_deref(),
            issue_number,
        );
        let instruction = prompts::codegen_instruction(issue_number);
        let mut messages = conversation_messages(&record);
        messages.push(Message::user(instruction.clone()));
        let system_prompt = system_prompt.as_str();
        let messages = &messages;
        let response = retry_with_backoff(
            &self.settings.retry_policy,
            self.sleeper.as_ref(),
            classify_assistant_error,
            move || self.converse(system_prompt, messages.clone()),
        )
        .await
        .context("failed to generate code")?;

        record.push_user(instruction);
        let reply = absorb_reply(&mut record, response);
        let change_set = parse_change_set(&reply);

        if change_set.is_empty() {
            tracing::warn!(
                repo = %repo,
                issue = issue_number,
                "assistant reply contained no file changes; asking for guidance"
            );
            self.tracker
                .create_issue_comment(
                    repo,
                    issue_number,
                    &prompts::format_fallback_comment(&reply),
                )
                .await
                .context("failed to post format fallback comment")?;
            record.status = IssueStatus::WaitingForClarification;
            self.persist(&record)?;
            return Ok(WorkflowOutcome::ReturnedForClarification);
        }

        for (path, content) in &change_set.files {
            tracing::debug!(repo = %repo, issue = issue_number, path = %path, "writing file");
            self.tracker
                .put_file(
                    repo,
                    path,
                    content,
                    &prompts::file_commit_message(path, issue_number),
                    &work_branch,
                )
                .await
                .with_context(|| format!("failed to write {path}"))?;
        }
        let summary = change_set.summary_with_file_list();

        if work_branch == default_branch {
            record.status = IssueStatus::Completed;
            self.persist(&record)?;
            self.tracker
                .create_issue_comment(
                    repo,
                    issue_number,
                    &prompts::direct_commit_comment(&work_branch, &summary),
                )
                .await
                .context("failed to post direct commit comment")?;
            if let Err(error) = self.tracker.close_issue(repo, issue_number).await {
                tracing::warn!(
                    repo = %repo,
                    issue = issue_number,
                    error = %format!("{error:#}"),
                    "failed to close issue after direct commit"
                );
            }
            tracing::info!(repo = %repo, issue = issue_number, branch = %work_branch, "committed directly");
            return Ok(WorkflowOutcome::CommittedDirectly {
                branch: work_branch,
            });
        }

        let issue = self
            .tracker
            .get_issue(repo, issue_number)
            .await
            .context("failed to get issue")?;
        let pull = self
            .tracker
            .create_pull_request(
                repo,
                &NewPullRequest {
                    title: prompts::pull_request_title(&issue.title),
                    head: work_branch,
                    base: default_branch,
                    body: prompts::pull_request_body(issue_number, &summary),
                },
            )
            .await
            .context("failed to create pull request")?;

        record.pull_request_number = Some(pull.number);
        record.status = IssueStatus::PrCreated;
        self.persist(&record)?;
        self.tracker
            .create_issue_comment(
                repo,
                issue_number,
                &prompts::pull_request_link_comment(pull.number),
            )
            .await
            .context("failed to post pull request link")?;
        tracing::info!(
            repo = %repo,
            issue = issue_number,
            pull = pull.number,
            files = change_set.len(),
            "pull request opened"
        );
        Ok(WorkflowOutcome::PullRequestOpened {
            number: pull.number,
        })
    }

    /// Issue number a pull request was opened for, read from its body marker.
    pub async fn linked_issue_number(&self, repo: &RepoRef, pull_number: u64) -> Result<u64> {
        let pull = self
            .tracker
            .get_pull_request(repo, pull_number)
            .await
            .context("failed to get pull request")?;
        prompts::extract_issue_number(pull.body_text()).ok_or_else(|| {
            anyhow!("pull request #{pull_number} body carries no `Fixes #N` marker")
        })
    }

    /// Review feedback on a pull request the agent opened for `issue_number`
    /// (see `linked_issue_number`).
    pub async fn handle_review_comment(
        &self,
        repo: &RepoRef,
        pull_number: u64,
        issue_number: u64,
        feedback: &str,
    ) -> Result<WorkflowOutcome> {
        let mut record = self.load(repo, issue_number)?.ok_or_else(|| {
            anyhow!("no record for {repo}#{issue_number} linked from pull request #{pull_number}")
        })?;
        tracing::info!(
            repo = %repo,
            issue = issue_number,
            pull = pull_number,
            "processing review feedback"
        );

        record.push_user(prompts::review_feedback_turn(feedback));
        let system_prompt = prompts::review_system_prompt();
        let response = self
            .converse(&system_prompt, conversation_messages(&record))
            .await
            .context("failed to get review revision")?;
        let reply = absorb_reply(&mut record, response);
        let change_set = parse_change_set(&reply);

        let branch = match record.work_branch() {
            Some(branch) => branch.to_string(),
            None => {
                self.tracker
                    .get_pull_request(repo, pull_number)
                    .await
                    .context("failed to get pull request")?
                    .head
                    .ref_name
            }
        };
        for (path, content) in &change_set.files {
            self.tracker
                .put_file(
                    repo,
                    path,
                    content,
                    &prompts::review_commit_message(issue_number),
                    &branch,
                )
                .await
                .with_context(|| format!("failed to write {path}"))?;
        }

        record.branch_name = Some(branch);
        record.status = IssueStatus::Reviewing;
        self.persist(&record)?;

        let comment = if change_set.is_empty() {
            reply
        } else {
            prompts::revision_comment(&change_set.summary_with_file_list())
        };
        self.tracker
            .create_issue_comment(repo, pull_number, &comment)
            .await
            .context("failed to post review reply")?;

        Ok(WorkflowOutcome::RevisionApplied {
            pull_number,
            files: change_set.len(),
        })
    }

    async fn seed_record(&self, repo: &RepoRef, issue: &GithubIssue) -> Result<IssueRecord> {
        let comments = self
            .tracker
            .list_issue_comments(repo, issue.number)
            .await
            .context("failed to list existing issue comments")?;
        let mut record = IssueRecord::new(&repo.owner, &repo.name, issue.number);
        record.push_user(prompts::issue_context_message(
            &issue.title,
            issue.body_text(),
        ));
        for comment in &comments {
            if self.is_self(&comment.user.login) {
                record.push_assistant(comment.body_text());
            } else {
                record.push_user(comment.body_text());
            }
        }
        if !comments.is_empty() {
            tracing::info!(
                repo = %repo,
                issue = issue.number,
                comments = comments.len(),
                "seeded conversation from existing comments"
            );
        }
        Ok(record)
    }

    async fn prepare_branch(
        &self,
        repo: &RepoRef,
        issue_number: u64,
        default_branch: &str,
    ) -> Result<String> {
        let branch = prompts::branch_name(&self.settings.branch_prefix, issue_number);
        match self
            .tracker
            .create_branch(repo, &branch, default_branch)
            .await
        {
            Ok(()) => {
                tracing::info!(repo = %repo, issue = issue_number, branch = %branch, "created work branch");
                Ok(branch)
            }
            Err(error) => {
                let message = format!("{error:#}");
                if is_branch_exists_error(&message) {
                    tracing::info!(repo = %repo, issue = issue_number, branch = %branch, "work branch already exists; reusing");
                    Ok(branch)
                } else if is_empty_repository_error(&message) {
                    tracing::warn!(
                        repo = %repo,
                        issue = issue_number,
                        branch = default_branch,
                        "repository is empty; committing to the default branch"
                    );
                    Ok(default_branch.to_string())
                } else {
                    Err(error.context("failed to create branch"))
                }
            }
        }
    }

    async fn converse(
        &self,
        system_prompt: &str,
        messages: Vec<Message>,
    ) -> Result<ChatResponse, RookAiError> {
        let mut request_messages = Vec::with_capacity(messages.len().saturating_add(1));
        request_messages.push(Message::system(system_prompt));
        request_messages.extend(messages);
        self.llm
            .complete(ChatRequest {
                model: self.settings.model.clone(),
                messages: request_messages,
                max_tokens: Some(self.settings.max_tokens),
                temperature: self.settings.temperature,
            })
            .await
    }

    fn load(&self, repo: &RepoRef, issue_number: u64) -> Result<Option<IssueRecord>> {
        self.store
            .get(&repo.owner, &repo.name, issue_number)
            .context("failed to load issue record")
    }

    fn persist(&self, record: &IssueRecord) -> Result<IssueRecord> {
        self.store
            .save(record)
            .with_context(|| format!("failed to save issue record {}", record.slug()))
    }
}

fn conversation_messages(record: &IssueRecord) -> Vec<Message> {
    record
        .conversation
        .iter()
        .map(|message| match message.role {
            ConversationRole::User => Message::user(message.content.clone()),
            ConversationRole::Assistant => Message::assistant_text(message.content.clone()),
        })
        .collect()
}

/// Records usage and appends the reply as an assistant turn.
fn absorb_reply(record: &mut IssueRecord, response: ChatResponse) -> String {
    record.usage.add(
        response.usage.input_tokens,
        response.usage.output_tokens,
        response.usage.cost_usd,
    );
    let reply = response.message.content;
    record.push_assistant(reply.clone());
    reply
}
