//! Extracts file writes and a summary from free-form assistant replies.
//!
//! Two dialects are understood, tried in order: a structured JSON object, then
//! fenced code blocks annotated with a file path. The first dialect that
//! yields at least one file wins.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

static FENCE_TAG_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:\w+)?\s+([\w/._ -]+?)\s*\n(.+?)```").expect("fence tag path regex")
});

static LABELED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?:File|Path):\s*`?([\w/._-]+)`?\s*\n+```(?:\w+)?\s*\n(.+?)```")
        .expect("labeled path regex")
});

static BARE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^([\w/._-]+)\s*$\s*```(?:\w+)?\s*\n(.+?)```").expect("bare path regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which reply shape produced the files.
pub enum ChangeSetDialect {
    Structured,
    FenceTaggedPath,
    LabeledPath,
    BarePath,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// File path to full intended content, plus a human summary.
pub struct ChangeSet {
    pub files: BTreeMap<String, String>,
    pub summary: String,
    pub dialect: Option<ChangeSetDialect>,
    summary_lists_files: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Summary followed by a `**Files changed:**` list, for PR bodies and comments.
    pub fn summary_with_file_list(&self) -> String {
        if self.summary_lists_files || self.files.is_empty() {
            return self.summary.clone();
        }
        let mut rendered = self.summary.trim_end().to_string();
        rendered.push_str("\n\n**Files changed:**");
        for path in self.files.keys() {
            rendered.push_str(&format!("\n- `{path}`"));
        }
        rendered
    }
}

#[derive(Debug, Deserialize)]
struct StructuredReply {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    files: Vec<StructuredFile>,
}

#[derive(Debug, Deserialize)]
struct StructuredFile {
    #[serde(default)]
    path: String,
    #[serde(default)]
    content: String,
}

/// Parses one assistant reply. An empty result is a normal outcome.
pub fn parse_change_set(raw: &str) -> ChangeSet {
    if let Some(change_set) = parse_structured(raw) {
        return change_set;
    }

    let attempts = [
        (ChangeSetDialect::FenceTaggedPath, &*FENCE_TAG_PATH),
        (ChangeSetDialect::LabeledPath, &*LABELED_PATH),
        (ChangeSetDialect::BarePath, &*BARE_PATH),
    ];
    for (dialect, pattern) in attempts {
        let files = collect_fenced_files(raw, pattern, dialect);
        if !files.is_empty() {
            let lead = leading_prose(raw);
            return match lead {
                Some(summary) => ChangeSet {
                    files,
                    summary,
                    dialect: Some(dialect),
                    summary_lists_files: false,
                },
                None => ChangeSet {
                    summary: synthesize_summary(&files),
                    files,
                    dialect: Some(dialect),
                    summary_lists_files: true,
                },
            };
        }
    }

    ChangeSet::default()
}

fn parse_structured(raw: &str) -> Option<ChangeSet> {
    let candidate = strip_json_fence(raw.trim());
    let reply: StructuredReply = serde_json::from_str(candidate).ok()?;
    let files = reply
        .files
        .into_iter()
        .filter(|file| !file.path.trim().is_empty() && !file.content.is_empty())
        .map(|file| (file.path.trim().to_string(), file.content))
        .collect::<BTreeMap<_, _>>();
    if files.is_empty() {
        return None;
    }
    let summary = reply.summary.trim().to_string();
    if summary.is_empty() {
        return Some(ChangeSet {
            summary: synthesize_summary(&files),
            files,
            dialect: Some(ChangeSetDialect::Structured),
            summary_lists_files: true,
        });
    }
    Some(ChangeSet {
        files,
        summary,
        dialect: Some(ChangeSetDialect::Structured),
        summary_lists_files: false,
    })
}

/// Accepts a reply that is exactly one ```json fence around the object.
fn strip_json_fence(trimmed: &str) -> &str {
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    if body.contains("```") {
        return trimmed;
    }
    body.trim()
}

fn collect_fenced_files(
    raw: &str,
    pattern: &Regex,
    dialect: ChangeSetDialect,
) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    for captures in pattern.captures_iter(raw) {
        let (Some(path), Some(body)) = (captures.get(1), captures.get(2)) else {
            continue;
        };
        let path = path.as_str().trim();
        if !accepts_path(path, dialect) {
            continue;
        }
        let content = body.as_str().trim_end_matches(['\n', '\r', ' ', '\t']);
        files.insert(path.to_string(), content.to_string());
    }
    files
}

fn accepts_path(path: &str, dialect: ChangeSetDialect) -> bool {
    if path.is_empty() {
        return false;
    }
    match dialect {
        ChangeSetDialect::FenceTaggedPath => path.contains('.') || path.contains('/'),
        ChangeSetDialect::LabeledPath => true,
        ChangeSetDialect::BarePath => path.contains('.') && !path.contains(' '),
        ChangeSetDialect::Structured => true,
    }
}

/// Non-empty lines before the first fence.
fn leading_prose(raw: &str) -> Option<String> {
    let lines = raw
        .lines()
        .take_while(|line| !line.trim_start().starts_with("```"))
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return None;
    }
    Some(lines.join("\n"))
}

fn synthesize_summary(files: &BTreeMap<String, String>) -> String {
    if files.len() == 1 {
        if let Some(path) = files.keys().next() {
            return format!("Updated `{path}`");
        }
    }
    let mut summary = format!("Updated {} files:", files.len());
    for path in files.keys() {
        summary.push_str(&format!("\n- `{path}`"));
    }
    summary
}
