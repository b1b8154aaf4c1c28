//! Substring predicates that steer the workflow.
//!
//! Misclassifications are expected; the poller's reconciliation pass and stuck
//! recovery correct them.

use std::sync::LazyLock;

use regex::Regex;
use rook_ai::RookAiError;

const DEFAULT_QUESTION_PHRASES: &[&str] = &[
    "question?",
    "questions:",
    "could you clarify",
    "can you clarify",
    "please clarify",
    "need clarification",
];

const DEFAULT_READY_PHRASES: &[&str] = &[
    "i'll create a pr",
    "i will create a pr",
    "i'll create a pull request",
    "i will create a pull request",
    "i'll open a pr",
    "i'll open a pull request",
    "proceeding with",
    "i'll proceed",
    "i'll start working",
    "i will start working",
    "i'll start implementing",
    "ready to implement",
];

static STATUS_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bstatus (\d{3})\b").expect("status prefix regex"));

static RATE_LIMIT_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|rate[ -]limit").expect("rate limit marker regex")
});

static SERVER_ERROR_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b50[0234]\b|internal server error|bad gateway|service unavailable|gateway timeout",
    )
    .expect("server error marker regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
/// Two complementary phrase tables: replies that still ask the human
/// something, and the agent's own comments that announce it is moving on.
pub struct ReplyClassifier {
    question_phrases: Vec<String>,
    ready_phrases: Vec<String>,
}

impl Default for ReplyClassifier {
    fn default() -> Self {
        Self {
            question_phrases: DEFAULT_QUESTION_PHRASES
                .iter()
                .map(|phrase| phrase.to_string())
                .collect(),
            ready_phrases: DEFAULT_READY_PHRASES
                .iter()
                .map(|phrase| phrase.to_string())
                .collect(),
        }
    }
}

impl ReplyClassifier {
    /// Default tables extended with configured phrases (matched lower-cased).
    pub fn with_extra_phrases(extra_question: &[String], extra_ready: &[String]) -> Self {
        let mut classifier = Self::default();
        classifier.question_phrases.extend(normalize(extra_question));
        classifier.ready_phrases.extend(normalize(extra_ready));
        classifier
    }

    /// True when the reply should be read as a clarifying question.
    pub fn asks_question(&self, reply: &str) -> bool {
        let lowered = reply.to_lowercase();
        if lowered.ends_with('?') {
            return true;
        }
        self.question_phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
    }

    /// True when the agent's own comment announces it is proceeding.
    pub fn signals_ready(&self, comment: &str) -> bool {
        let lowered = comment.to_lowercase().replace('\u{2019}', "'");
        self.ready_phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
    }
}

fn normalize(phrases: &[String]) -> impl Iterator<Item = String> + '_ {
    phrases
        .iter()
        .map(|phrase| phrase.trim().to_lowercase())
        .filter(|phrase| !phrase.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `RetryableErrorKind` values.
pub enum RetryableErrorKind {
    RateLimit,
    ServerError,
}

impl RetryableErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::RateLimit => "rate limit",
            Self::ServerError => "server error",
        }
    }
}

/// 429 is a rate limit and 5xx a server error; every other status is permanent.
pub fn classify_retryable_status(status: u16) -> Option<RetryableErrorKind> {
    match status {
        429 => Some(RetryableErrorKind::RateLimit),
        500..=599 => Some(RetryableErrorKind::ServerError),
        _ => None,
    }
}

/// Sniffs an error message for transient failure markers. A rendered
/// `status NNN` wins over anything in the body that follows it.
pub fn classify_retryable_error(message: &str) -> Option<RetryableErrorKind> {
    if let Some(status) = STATUS_PREFIX
        .captures(message)
        .and_then(|captures| captures.get(1))
        .and_then(|status| status.as_str().parse::<u16>().ok())
    {
        return classify_retryable_status(status);
    }
    if SERVER_ERROR_MARKERS.is_match(message) {
        return Some(RetryableErrorKind::ServerError);
    }
    if RATE_LIMIT_MARKERS.is_match(message) {
        return Some(RetryableErrorKind::RateLimit);
    }
    None
}

/// Assistant failures with an HTTP status are judged by the status alone.
pub fn classify_assistant_error(error: &RookAiError) -> Option<RetryableErrorKind> {
    match error.status() {
        Some(status) => classify_retryable_status(status),
        None => classify_retryable_error(&error.to_string()),
    }
}

/// Branch creation failed because the repository has no commits yet.
pub fn is_empty_repository_error(message: &str) -> bool {
    message.contains("409") || message.to_lowercase().contains("empty")
}

/// Branch creation failed because the ref is already there.
pub fn is_branch_exists_error(message: &str) -> bool {
    message.to_lowercase().contains("reference already exists")
}
