use anyhow::{Context, Result};
use rook_github::{GithubUser, RepoRef};
use rook_workflow::WorkflowEvent;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
/// What one delivery asks of the workflow.
pub enum WebhookDelivery {
    Ping,
    Dispatch(WorkflowEvent),
    Ignored { reason: String },
}

impl WebhookDelivery {
    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PayloadRepository {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PayloadIssue {
    number: u64,
    #[serde(default)]
    pull_request: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PayloadComment {
    #[serde(default)]
    body: Option<String>,
    user: GithubUser,
}

#[derive(Debug, Deserialize)]
struct PayloadPullRequest {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct IssuesPayload {
    action: String,
    issue: PayloadIssue,
    #[serde(default)]
    assignee: Option<GithubUser>,
    repository: PayloadRepository,
}

#[derive(Debug, Deserialize)]
struct IssueCommentPayload {
    action: String,
    issue: PayloadIssue,
    comment: PayloadComment,
    repository: PayloadRepository,
}

#[derive(Debug, Deserialize)]
struct ReviewCommentPayload {
    action: String,
    pull_request: PayloadPullRequest,
    comment: PayloadComment,
    repository: PayloadRepository,
}

fn decode<T: DeserializeOwned>(event_name: &str, payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload)
        .with_context(|| format!("failed to parse {event_name} webhook payload"))
}

/// Maps one delivery (the `X-GitHub-Event` name plus its JSON body) to the
/// workflow step it triggers. `identity` filters out the agent's own activity.
pub fn classify_delivery(event_name: &str, payload: &[u8], identity: &str) -> Result<WebhookDelivery> {
    let is_self = |login: &str| login.eq_ignore_ascii_case(identity);
    match event_name {
        "ping" => Ok(WebhookDelivery::Ping),
        "issues" => {
            let event: IssuesPayload = decode(event_name, payload)?;
            if event.action != "assigned" {
                return Ok(WebhookDelivery::ignored(format!("issues action '{}'", event.action)));
            }
            if let Some(assignee) = &event.assignee {
                if !is_self(&assignee.login) {
                    return Ok(WebhookDelivery::ignored(format!(
                        "assigned to '{}'",
                        assignee.login
                    )));
                }
            }
            Ok(WebhookDelivery::Dispatch(WorkflowEvent::IssueAssigned {
                repo: RepoRef::parse(&event.repository.full_name)?,
                issue_number: event.issue.number,
            }))
        }
        "issue_comment" => {
            let event: IssueCommentPayload = decode(event_name, payload)?;
            if event.action != "created" {
                return Ok(WebhookDelivery::ignored(format!(
                    "issue_comment action '{}'",
                    event.action
                )));
            }
            if is_self(&event.comment.user.login) {
                return Ok(WebhookDelivery::ignored("own comment"));
            }
            let repo = RepoRef::parse(&event.repository.full_name)?;
            let body = event.comment.body.unwrap_or_default();
            // Conversation comments on a pull request arrive as issue comments.
            if event.issue.pull_request.is_some() {
                return Ok(WebhookDelivery::Dispatch(WorkflowEvent::ReviewComment {
                    repo,
                    pull_number: event.issue.number,
                    body,
                }));
            }
            Ok(WebhookDelivery::Dispatch(WorkflowEvent::IssueComment {
                repo,
                issue_number: event.issue.number,
                body,
            }))
        }
        "pull_request_review_comment" => {
            let event: ReviewCommentPayload = decode(event_name, payload)?;
            if event.action != "created" {
                return Ok(WebhookDelivery::ignored(format!(
                    "pull_request_review_comment action '{}'",
                    event.action
                )));
            }
            if is_self(&event.comment.user.login) {
                return Ok(WebhookDelivery::ignored("own review comment"));
            }
            Ok(WebhookDelivery::Dispatch(WorkflowEvent::ReviewComment {
                repo: RepoRef::parse(&event.repository.full_name)?,
                pull_number: event.pull_request.number,
                body: event.comment.body.unwrap_or_default(),
            }))
        }
        other => Ok(WebhookDelivery::ignored(format!("event '{other}'"))),
    }
}
