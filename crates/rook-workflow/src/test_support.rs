use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rook_ai::{ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, RookAiError};
use rook_github::{
    GithubComment, GithubCommentCreateResponse, GithubIssue, GithubPullRequest,
    GithubPullRequestRef, GithubRepository, GithubReviewComment, GithubUser, IssueTracker,
    NewPullRequest, RepoRef,
};
use rook_state::IssueStateStore;

use crate::agent::{IssueAgent, IssueAgentSettings};
use crate::retry::tests::RecordingSleeper;

pub(crate) const BOT_LOGIN: &str = "rook-bot";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BranchBehavior {
    Create,
    AlreadyExists,
    EmptyRepository,
}

#[derive(Debug, Clone)]
pub(crate) struct WrittenFile {
    pub(crate) path: String,
    pub(crate) content: String,
    pub(crate) message: String,
    pub(crate) branch: String,
}

pub(crate) struct FakeTrackerState {
    pub(crate) issues: BTreeMap<u64, GithubIssue>,
    pub(crate) comments: BTreeMap<u64, Vec<GithubComment>>,
    pub(crate) review_comments: BTreeMap<u64, Vec<GithubReviewComment>>,
    pub(crate) pulls: BTreeMap<u64, GithubPullRequest>,
    pub(crate) branch_behavior: BranchBehavior,
    pub(crate) branches: Vec<String>,
    pub(crate) files: Vec<WrittenFile>,
    pub(crate) closed: Vec<u64>,
    pub(crate) pull_fetches: usize,
    pub(crate) next_id: u64,
}

/// In-memory tracker that records every side effect.
pub(crate) struct FakeTracker {
    pub(crate) state: Mutex<FakeTrackerState>,
}

pub(crate) fn issue(number: u64, title: &str, body: &str) -> GithubIssue {
    let now = Utc::now();
    GithubIssue {
        number,
        title: title.to_string(),
        body: Some(body.to_string()),
        user: GithubUser {
            login: "alice".to_string(),
        },
        assignees: vec![GithubUser {
            login: BOT_LOGIN.to_string(),
        }],
        state: Some("open".to_string()),
        created_at: now,
        updated_at: now,
        pull_request: None,
    }
}

impl FakeTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(FakeTrackerState {
                issues: BTreeMap::new(),
                comments: BTreeMap::new(),
                review_comments: BTreeMap::new(),
                pulls: BTreeMap::new(),
                branch_behavior: BranchBehavior::Create,
                branches: Vec::new(),
                files: Vec::new(),
                closed: Vec::new(),
                pull_fetches: 0,
                next_id: 100,
            }),
        }
    }

    pub(crate) fn with_issue(self, issue: GithubIssue) -> Self {
        self.lock().issues.insert(issue.number, issue);
        self
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, FakeTrackerState> {
        self.state.lock().expect("fake tracker lock")
    }

    pub(crate) fn add_comment(&self, number: u64, login: &str, body: &str, at: DateTime<Utc>) {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.comments.entry(number).or_default().push(GithubComment {
            id,
            body: Some(body.to_string()),
            user: GithubUser {
                login: login.to_string(),
            },
            created_at: at,
            updated_at: at,
        });
    }

    pub(crate) fn add_review_comment(
        &self,
        pull_number: u64,
        login: &str,
        path: &str,
        body: &str,
        at: DateTime<Utc>,
    ) {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state
            .review_comments
            .entry(pull_number)
            .or_default()
            .push(GithubReviewComment {
                id,
                body: Some(body.to_string()),
                user: GithubUser {
                    login: login.to_string(),
                },
                path: Some(path.to_string()),
                created_at: at,
            });
    }

    pub(crate) fn bot_comments(&self, number: u64) -> Vec<String> {
        self.lock()
            .comments
            .get(&number)
            .map(|comments| {
                comments
                    .iter()
                    .filter(|comment| comment.user.login == BOT_LOGIN)
                    .map(|comment| comment.body_text().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn resolve_login(&self) -> Result<String> {
        Ok(BOT_LOGIN.to_string())
    }

    async fn get_issue(&self, _repo: &RepoRef, issue_number: u64) -> Result<GithubIssue> {
        self.lock()
            .issues
            .get(&issue_number)
            .cloned()
            .ok_or_else(|| anyhow!("github api get issue failed with status 404: not found"))
    }

    async fn list_assigned_open_issues(
        &self,
        _repo: &RepoRef,
        _assignee: &str,
    ) -> Result<Vec<GithubIssue>> {
        let state = self.lock();
        Ok(state
            .issues
            .values()
            .filter(|issue| !state.closed.contains(&issue.number))
            .cloned()
            .collect())
    }

    async fn list_issue_comments(
        &self,
        _repo: &RepoRef,
        issue_number: u64,
    ) -> Result<Vec<GithubComment>> {
        Ok(self
            .lock()
            .comments
            .get(&issue_number)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_issue_comment(
        &self,
        _repo: &RepoRef,
        issue_number: u64,
        body: &str,
    ) -> Result<GithubCommentCreateResponse> {
        self.add_comment(issue_number, BOT_LOGIN, body, Utc::now());
        let id = self.lock().next_id;
        Ok(GithubCommentCreateResponse { id, html_url: None })
    }

    async fn close_issue(&self, _repo: &RepoRef, issue_number: u64) -> Result<()> {
        self.lock().closed.push(issue_number);
        Ok(())
    }

    async fn get_repository(&self, _repo: &RepoRef) -> Result<GithubRepository> {
        Ok(GithubRepository {
            default_branch: Some("main".to_string()),
            language: Some("Rust".to_string()),
        })
    }

    async fn create_branch(&self, _repo: &RepoRef, branch: &str, _base: &str) -> Result<()> {
        let mut state = self.lock();
        match state.branch_behavior {
            BranchBehavior::Create => {
                state.branches.push(branch.to_string());
                Ok(())
            }
            BranchBehavior::AlreadyExists => bail!(
                "github api create branch failed with status 422: {{\"message\":\"Reference already exists\"}}"
            ),
            BranchBehavior::EmptyRepository => bail!(
                "github api get base branch ref failed with status 409: {{\"message\":\"Git Repository is empty.\"}}"
            ),
        }
    }

    async fn get_file_sha(
        &self,
        _repo: &RepoRef,
        _path: &str,
        _branch: &str,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    async fn put_file(
        &self,
        _repo: &RepoRef,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<()> {
        self.lock().files.push(WrittenFile {
            path: path.to_string(),
            content: content.to_string(),
            message: message.to_string(),
            branch: branch.to_string(),
        });
        Ok(())
    }

    async fn get_pull_request(&self, _repo: &RepoRef, number: u64) -> Result<GithubPullRequest> {
        let mut state = self.lock();
        state.pull_fetches += 1;
        state
            .pulls
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("github api get pull request failed with status 404"))
    }

    async fn create_pull_request(
        &self,
        _repo: &RepoRef,
        request: &NewPullRequest,
    ) -> Result<GithubPullRequest> {
        let mut state = self.lock();
        let number = 40 + state.pulls.len() as u64;
        let pull = GithubPullRequest {
            number,
            title: Some(request.title.clone()),
            body: Some(request.body.clone()),
            html_url: None,
            state: Some("open".to_string()),
            head: GithubPullRequestRef {
                ref_name: request.head.clone(),
            },
        };
        state.pulls.insert(number, pull.clone());
        Ok(pull)
    }

    async fn list_review_comments(
        &self,
        _repo: &RepoRef,
        pull_number: u64,
    ) -> Result<Vec<GithubReviewComment>> {
        Ok(self
            .lock()
            .review_comments
            .get(&pull_number)
            .cloned()
            .unwrap_or_default())
    }
}

/// Assistant that replays queued replies and records every request.
#[derive(Default)]
pub(crate) struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, RookAiError>>>,
    pub(crate) requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub(crate) fn new<const N: usize>(replies: [&str; N]) -> Self {
        let llm = Self::default();
        for reply in replies {
            llm.push_reply(reply);
        }
        llm
    }

    pub(crate) fn push_reply(&self, reply: &str) {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Ok(reply.to_string()));
    }

    pub(crate) fn push_error(&self, error: RookAiError) {
        self.replies.lock().expect("replies lock").push_back(Err(error));
    }

    pub(crate) fn system_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter_map(|request| request.messages.first())
            .map(|message| message.content.clone())
            .collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, RookAiError> {
        let model = request.model.clone();
        self.requests.lock().expect("requests lock").push(request);
        let reply = self
            .replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(RookAiError::InvalidResponse("script exhausted".to_string())))?;
        Ok(ChatResponse {
            message: Message::assistant_text(reply),
            model,
            finish_reason: Some("stop".to_string()),
            usage: ChatUsage {
                input_tokens: 100,
                output_tokens: 20,
                total_tokens: 120,
                cost_usd: 0.01,
            },
        })
    }
}

pub(crate) struct Harness {
    pub(crate) tracker: Arc<FakeTracker>,
    pub(crate) llm: Arc<ScriptedLlm>,
    pub(crate) sleeper: Arc<RecordingSleeper>,
    pub(crate) agent: Arc<IssueAgent>,
    pub(crate) repo: RepoRef,
}

impl Harness {
    pub(crate) fn new(tracker: FakeTracker, llm: ScriptedLlm) -> Self {
        let tracker = Arc::new(tracker);
        let llm = Arc::new(llm);
        let sleeper = Arc::new(RecordingSleeper::default());
        let store = Arc::new(IssueStateStore::open_in_memory().expect("open store"));
        let agent = IssueAgent::new(
            tracker.clone(),
            llm.clone(),
            store,
            BOT_LOGIN,
            IssueAgentSettings::default(),
        )
        .with_sleeper(sleeper.clone());
        Self {
            tracker,
            llm,
            sleeper,
            agent: Arc::new(agent),
            repo: RepoRef::new("acme", "widgets"),
        }
    }

    pub(crate) fn record(&self, number: u64) -> rook_state::IssueRecord {
        self.agent
            .store()
            .get("acme", "widgets", number)
            .expect("load record")
            .expect("record exists")
    }
}
