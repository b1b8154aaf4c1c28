//! Prompt text, comment templates, and the PR-body linkage marker.

use std::sync::LazyLock;

use regex::Regex;

static FIXES_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Fixes #(\d+)").expect("fixes marker regex"));

pub const ANALYZE_SYSTEM_PROMPT: &str = "You are a software engineering assistant that \
analyzes GitHub issues before implementing them.\n\
1. Restate what the issue is asking for.\n\
2. Ask specific clarifying questions if anything is unclear.\n\
3. If everything is clear, say that you are ready to create a PR.\n\
Be concise and professional.";

pub const CONFIRM_SYSTEM_PROMPT: &str = "You are a software engineering assistant. Review the \
entire conversation and decide whether you have enough information to implement the issue. \
If you do, say so clearly. If not, ask specific clarifying questions.";

pub const COMMENT_REPLY_SYSTEM_PROMPT: &str = "You are a software engineering assistant working \
on a GitHub issue. Respond to the latest comment. If the discussion now gives you enough \
information to implement the issue, say clearly that you will proceed.";

pub const REVIEW_SYSTEM_PROMPT: &str = "You are a software engineer responding to code review \
feedback on a pull request you opened. Apply the requested changes.\n\n";

pub const STRUCTURED_OUTPUT_INSTRUCTIONS: &str = "Respond with a single JSON object and nothing \
else, shaped as {\"summary\": \"<what changed and why>\", \"files\": [{\"path\": \
\"<repository-relative path>\", \"content\": \"<complete new file content>\"}]}. Every file \
entry must contain the complete file, not a diff.";

pub const STARTING_COMMENT: &str =
    "🚀 Thanks, I have what I need. I'm starting on the implementation and will open a pull request shortly.";

pub const FORMAT_FALLBACK_HEADER: &str =
    "⚠️ I tried to implement this issue but could not extract any file changes from the result.";

const SIGNATURE: &str = "🤖 rook";

/// First user turn of every conversation.
pub fn issue_context_message(title: &str, body: &str) -> String {
    format!("Issue Title: {title}\n\nIssue Description:\n{body}")
}

pub fn analysis_request(title: &str, body: &str) -> String {
    format!(
        "Please analyze this GitHub issue:\n\nTitle: {title}\n\nDescription:\n{body}\n\n\
Provide:\n1. A clear summary of what this issue is asking for\n\
2. Any clarifying questions you have\n\
3. If everything is clear, confirm you understand and are ready to create a PR"
    )
}

pub fn codegen_system_prompt(repo_slug: &str, language: Option<&str>, issue_number: u64) -> String {
    let language = language
        .filter(|language| !language.trim().is_empty())
        .unwrap_or("unknown");
    format!(
        "You are an expert software engineer implementing GitHub issue #{issue_number} in \
{repo_slug} (primary language: {language}). Use the conversation so far as the full \
requirements.\n\n{STRUCTURED_OUTPUT_INSTRUCTIONS}"
    )
}

pub fn codegen_instruction(issue_number: u64) -> String {
    format!("Implement the changes for issue #{issue_number} now.")
}

pub fn review_system_prompt() -> String {
    format!("{REVIEW_SYSTEM_PROMPT}{STRUCTURED_OUTPUT_INSTRUCTIONS}")
}

pub fn review_feedback_turn(feedback: &str) -> String {
    format!("Review feedback: {feedback}")
}

pub fn analysis_comment(reply: &str) -> String {
    format!("👋 Hi! I've been assigned to this issue. Here's my understanding:\n\n{reply}")
}

pub fn format_fallback_comment(raw_reply: &str) -> String {
    format!(
        "{FORMAT_FALLBACK_HEADER}\n\nHere is what I produced:\n\n{raw_reply}\n\n---\n\n\
Could you review this and tell me how to proceed?\n\n{SIGNATURE}"
    )
}

pub fn is_format_fallback_comment(body: &str) -> bool {
    body.trim_start().starts_with(FORMAT_FALLBACK_HEADER)
}

pub fn direct_commit_comment(branch: &str, summary: &str) -> String {
    format!(
        "✅ The repository had no commits yet, so I committed the changes directly to `{branch}`.\n\n\
{summary}\n\nClosing this issue as completed.\n\n---\n\n{SIGNATURE}"
    )
}

pub fn pull_request_title(issue_title: &str) -> String {
    format!("Fix: {issue_title}")
}

/// PR body. The leading `Fixes #N` marker is the only link back to the issue.
pub fn pull_request_body(issue_number: u64, summary: &str) -> String {
    format!("Fixes #{issue_number}\n\n{summary}\n\n---\n\n{SIGNATURE}")
}

pub fn pull_request_link_comment(pull_number: u64) -> String {
    format!("✅ I've opened a pull request: #{pull_number}")
}

pub fn revision_comment(summary: &str) -> String {
    format!("🔁 I've pushed an update addressing the review feedback.\n\n{summary}")
}

pub fn file_commit_message(path: &str, issue_number: u64) -> String {
    format!("Update {path} for issue #{issue_number}")
}

pub fn review_commit_message(issue_number: u64) -> String {
    format!("Address review feedback for issue #{issue_number}")
}

pub fn branch_name(prefix: &str, issue_number: u64) -> String {
    let prefix = prefix.trim().trim_end_matches('/');
    if prefix.is_empty() {
        return format!("issue-{issue_number}");
    }
    format!("{prefix}/issue-{issue_number}")
}

/// Issue number embedded by `pull_request_body`, if present.
pub fn extract_issue_number(body: &str) -> Option<u64> {
    FIXES_MARKER
        .captures(body)
        .and_then(|captures| captures.get(1))
        .and_then(|number| number.as_str().parse::<u64>().ok())
        .filter(|number| *number > 0)
}
