use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StateStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Workflow stage of one issue.
pub enum IssueStatus {
    Analyzing,
    WaitingForClarification,
    ReadyToImplement,
    Implementing,
    PrCreated,
    Reviewing,
    Completed,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 7] = [
        Self::Analyzing,
        Self::WaitingForClarification,
        Self::ReadyToImplement,
        Self::Implementing,
        Self::PrCreated,
        Self::Reviewing,
        Self::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyzing => "analyzing",
            Self::WaitingForClarification => "waiting_for_clarification",
            Self::ReadyToImplement => "ready_to_implement",
            Self::Implementing => "implementing",
            Self::PrCreated => "pr_created",
            Self::Reviewing => "reviewing",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = StateStoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| StateStoreError::InvalidPersistedValue {
                field: "status",
                value: raw.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ConversationRole` values.
pub enum ConversationRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One persisted conversation turn.
pub struct ConversationMessage {
    pub role: ConversationRole,
    pub content: String,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
/// Running token and cost totals for one issue. Only ever grows.
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl UsageTotals {
    pub fn add(&mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        self.input_tokens = self.input_tokens.saturating_add(input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(output_tokens);
        if cost_usd.is_finite() && cost_usd > 0.0 {
            self.cost_usd += cost_usd;
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Persisted workflow state of one tracker issue.
pub struct IssueRecord {
    pub id: Option<i64>,
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub status: IssueStatus,
    pub branch_name: Option<String>,
    pub pull_request_number: Option<u64>,
    pub conversation: Vec<ConversationMessage>,
    pub usage: UsageTotals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IssueRecord {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, issue_number: u64) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            owner: owner.into(),
            repo: repo.into(),
            issue_number,
            status: IssueStatus::Analyzing,
            branch_name: None,
            pull_request_number: None,
            conversation: Vec::new(),
            usage: UsageTotals::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn slug(&self) -> String {
        format!("{}/{}#{}", self.owner, self.repo, self.issue_number)
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.conversation.push(ConversationMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.conversation
            .push(ConversationMessage::assistant(content));
    }

    /// Branch name once one exists. Empty strings count as unset.
    pub fn work_branch(&self) -> Option<&str> {
        self.branch_name
            .as_deref()
            .filter(|branch| !branch.trim().is_empty())
    }
}
