use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use httpmock::prelude::*;
use rook_ai::{OpenRouterClient, OpenRouterConfig};
use rook_github::{GithubApiClient, GithubClientConfig, RepoRef};
use rook_state::{IssueStateStore, IssueStatus};
use rook_workflow::{IssueAgent, IssueAgentSettings, IssueLocks, IssuePoller, PollerConfig};
use serde_json::{json, Value};

const ANALYZE_MARKER: &str = "analyzes GitHub issues before implementing them";
const COMMENT_REPLY_MARKER: &str = "Respond to the latest comment";
const CODEGEN_MARKER: &str = "Respond with a single JSON object";

struct Fixture {
    github: MockServer,
    assistant: MockServer,
    store: Arc<IssueStateStore>,
    poller: IssuePoller,
    _temp: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let github = MockServer::start();
    let assistant = MockServer::start();
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(open_store(&temp.path().join("state.db")));

    let mut github_config = GithubClientConfig::new(github.base_url(), "test-token");
    github_config.retry_max_attempts = 1;
    github_config.retry_base_delay_ms = 1;
    let tracker = GithubApiClient::new(github_config).expect("github client");
    let llm = OpenRouterClient::new(OpenRouterConfig::new(
        format!("{}/api/v1", assistant.base_url()),
        "test-openrouter-key",
    ))
    .expect("assistant client");

    let agent = Arc::new(IssueAgent::new(
        Arc::new(tracker),
        Arc::new(llm),
        store.clone(),
        "rook-bot",
        IssueAgentSettings::default(),
    ));
    let poller = IssuePoller::new(
        agent,
        IssueLocks::new(),
        PollerConfig::new(vec![RepoRef::new("acme", "widgets")]),
    );
    Fixture {
        github,
        assistant,
        store,
        poller,
        _temp: temp,
    }
}

fn open_store(path: &Path) -> IssueStateStore {
    IssueStateStore::open(path).expect("open state store")
}

fn issue_json(number: u64, title: &str, body: &str) -> Value {
    json!({
        "number": number,
        "title": title,
        "body": body,
        "user": {"login": "alice"},
        "assignees": [{"login": "rook-bot"}],
        "state": "open",
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z"
    })
}

fn completion(content: &str) -> Value {
    json!({
        "model": "openrouter/auto",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150, "cost": 0.002}
    })
}

fn mock_assistant_reply<'a>(server: &'a MockServer, marker: &str, reply: &str) -> httpmock::Mock<'a> {
    let body = completion(reply);
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/chat/completions")
            .body_includes(marker);
        then.status(200).json_body(body);
    })
}

fn mock_assigned_issue<'a>(server: &'a MockServer, issue: &Value) -> Vec<httpmock::Mock<'a>> {
    let number = issue["number"].as_u64().expect("issue number");
    let listed = json!([issue.clone()]);
    let single = issue.clone();
    vec![
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/widgets/issues")
                .query_param("assignee", "rook-bot")
                .query_param("state", "open");
            then.status(200).json_body(listed);
        }),
        server.mock(|when, then| {
            when.method(GET)
                .path(format!("/repos/acme/widgets/issues/{number}"));
            then.status(200).json_body(single);
        }),
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets");
            then.status(200)
                .json_body(json!({"default_branch": "main", "language": "Rust"}));
        }),
    ]
}

fn mock_comment_post<'a>(server: &'a MockServer, number: u64) -> httpmock::Mock<'a> {
    server.mock(|when, then| {
        when.method(POST)
            .path(format!("/repos/acme/widgets/issues/{number}/comments"));
        then.status(201)
            .json_body(json!({"id": 9001, "html_url": "https://example.invalid/c/9001"}));
    })
}

fn mock_comment_list<'a>(server: &'a MockServer, number: u64, comments: Value) -> httpmock::Mock<'a> {
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("/repos/acme/widgets/issues/{number}/comments"));
        then.status(200).json_body(comments);
    })
}

fn mock_file_write<'a>(server: &'a MockServer, path: &str, branch: &str) -> Vec<httpmock::Mock<'a>> {
    let contents_path = format!("/repos/acme/widgets/contents/{path}");
    vec![
        server.mock(|when, then| {
            when.method(GET)
                .path(contents_path.clone())
                .query_param("ref", branch);
            then.status(404).json_body(json!({"message": "Not Found"}));
        }),
        server.mock(|when, then| {
            when.method(PUT)
                .path(contents_path.clone())
                .json_body_includes(json!({"branch": branch}).to_string());
            then.status(201).json_body(json!({"content": {"path": path}}));
        }),
    ]
}

const CODE_REPLY: &str = r#"{"summary":"Add a /health route","files":[{"path":"src/health.rs","content":"pub fn health() -> &'static str {\n    \"ok\"\n}\n"}]}"#;

#[tokio::test]
async fn integration_new_issue_is_analyzed_implemented_and_opened_as_pull_request() {
    let fixture = fixture();
    let github = &fixture.github;
    let _issue = mock_assigned_issue(github, &issue_json(7, "Add health check endpoint", ""));
    let comment_list = mock_comment_list(github, 7, json!([]));
    let comment_post = mock_comment_post(github, 7);
    let base_ref = github.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/git/ref/heads/main");
        then.status(200).json_body(json!({"object": {"sha": "base-sha"}}));
    });
    let create_ref = github.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/git/refs")
            .json_body(json!({"ref": "refs/heads/rook/issue-7", "sha": "base-sha"}));
        then.status(201)
            .json_body(json!({"object": {"sha": "base-sha"}}));
    });
    let file_write = mock_file_write(github, "src/health.rs", "rook/issue-7");
    let create_pull = github.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/pulls")
            .json_body_includes(
                json!({"title": "Fix: Add health check endpoint", "head": "rook/issue-7", "base": "main"})
                    .to_string(),
            )
            .body_includes("Fixes #7");
        then.status(201).json_body(json!({
            "number": 40,
            "title": "Fix: Add health check endpoint",
            "body": "Fixes #7",
            "html_url": "https://example.invalid/pull/40",
            "state": "open",
            "head": {"ref": "rook/issue-7"}
        }));
    });
    let review_list = github.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/pulls/40/comments");
        then.status(200).json_body(json!([]));
    });
    let pull_comment_list = mock_comment_list(github, 40, json!([]));

    let analysis = mock_assistant_reply(
        &fixture.assistant,
        ANALYZE_MARKER,
        "I have enough context, I'll create a PR for this.",
    );
    let codegen = mock_assistant_reply(&fixture.assistant, CODEGEN_MARKER, CODE_REPLY);

    let report = fixture.poller.poll_once().await;
    assert_eq!(report.new_issues, 1);
    assert_eq!(report.failed_issues, 0);
    assert_eq!(report.failed_repositories, 0);

    analysis.assert_calls(1);
    codegen.assert_calls(1);
    comment_list.assert_calls(1);
    comment_post.assert_calls(3);
    base_ref.assert_calls(1);
    create_ref.assert_calls(1);
    file_write[1].assert_calls(1);
    create_pull.assert_calls(1);

    let record = fixture
        .store
        .get("acme", "widgets", 7)
        .expect("load record")
        .expect("record saved");
    assert_eq!(record.status, IssueStatus::PrCreated);
    assert_eq!(record.pull_request_number, Some(40));
    assert_eq!(record.branch_name.as_deref(), Some("rook/issue-7"));
    assert_eq!(record.usage.input_tokens, 240);
    assert_eq!(record.usage.output_tokens, 60);
    assert!((record.usage.cost_usd - 0.004).abs() < 1e-9);

    let idle = fixture.poller.poll_once().await;
    assert_eq!(idle.new_issues, 0);
    assert_eq!(idle.review_dispatches, 0);
    assert_eq!(idle.failed_issues, 0);
    review_list.assert_calls(1);
    pull_comment_list.assert_calls(1);
    comment_post.assert_calls(3);
    analysis.assert_calls(1);
    codegen.assert_calls(1);
}

#[tokio::test]
async fn integration_question_waits_for_answer_then_implements() {
    let fixture = fixture();
    let github = &fixture.github;
    let _issue = mock_assigned_issue(github, &issue_json(3, "Persist sessions", "Store sessions"));
    let mut comment_list = mock_comment_list(github, 3, json!([]));
    let comment_post = mock_comment_post(github, 3);
    let analysis = mock_assistant_reply(
        &fixture.assistant,
        ANALYZE_MARKER,
        "Which database should sessions live in?",
    );

    let first = fixture.poller.poll_once().await;
    assert_eq!(first.new_issues, 1);
    comment_post.assert_calls(1);
    let record = fixture
        .store
        .get("acme", "widgets", 3)
        .expect("load record")
        .expect("record saved");
    assert_eq!(record.status, IssueStatus::WaitingForClarification);

    let quiet = fixture.poller.poll_once().await;
    assert_eq!(quiet.comment_dispatches, 0);
    comment_post.assert_calls(1);

    let answered_at = (record.updated_at + chrono::Duration::milliseconds(1))
        .to_rfc3339_opts(SecondsFormat::Micros, true);
    comment_list.delete();
    comment_list = mock_comment_list(
        github,
        3,
        json!([
            {
                "id": 1,
                "body": "👋 Hi! Which database should sessions live in?",
                "user": {"login": "rook-bot"},
                "created_at": "2026-01-01T00:00:00Z",
                "updated_at": "2026-01-01T00:00:00Z"
            },
            {
                "id": 2,
                "body": "Use SQLite please.",
                "user": {"login": "alice"},
                "created_at": answered_at,
                "updated_at": answered_at
            }
        ]),
    );
    let reply = mock_assistant_reply(
        &fixture.assistant,
        COMMENT_REPLY_MARKER,
        "Thanks, SQLite it is. Proceeding with the implementation.",
    );
    let codegen = mock_assistant_reply(
        &fixture.assistant,
        CODEGEN_MARKER,
        r#"{"summary":"Store sessions in SQLite","files":[{"path":"src/sessions.rs","content":"pub struct Sessions;"}]}"#,
    );
    let _base_ref = github.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/git/ref/heads/main");
        then.status(200).json_body(json!({"object": {"sha": "base-sha"}}));
    });
    let _create_ref = github.mock(|when, then| {
        when.method(POST).path("/repos/acme/widgets/git/refs");
        then.status(201).json_body(json!({"object": {"sha": "base-sha"}}));
    });
    let file_write = mock_file_write(github, "src/sessions.rs", "rook/issue-3");
    let create_pull = github.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/pulls")
            .body_includes("Fixes #3");
        then.status(201).json_body(json!({
            "number": 41,
            "body": "Fixes #3",
            "head": {"ref": "rook/issue-3"}
        }));
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    let answered = fixture.poller.poll_once().await;
    assert_eq!(answered.comment_dispatches, 1);
    assert_eq!(answered.failed_issues, 0);
    comment_list.assert_calls(1);
    analysis.assert_calls(1);
    reply.assert_calls(1);
    codegen.assert_calls(1);
    file_write[1].assert_calls(1);
    create_pull.assert_calls(1);
    // reply, starting work, pull request link
    comment_post.assert_calls(4);

    let record = fixture
        .store
        .get("acme", "widgets", 3)
        .expect("load record")
        .expect("record saved");
    assert_eq!(record.status, IssueStatus::PrCreated);
    assert_eq!(record.pull_request_number, Some(41));
    assert!(record
        .conversation
        .iter()
        .any(|message| message.content == "Use SQLite please."));
}

#[tokio::test]
async fn integration_empty_repository_commits_to_default_branch_and_closes_issue() {
    let fixture = fixture();
    let github = &fixture.github;
    let _issue = mock_assigned_issue(github, &issue_json(1, "Bootstrap README", "Add a README"));
    let _comment_list = mock_comment_list(github, 1, json!([]));
    let comment_post = mock_comment_post(github, 1);
    let base_ref = github.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/git/ref/heads/main");
        then.status(409)
            .json_body(json!({"message": "Git Repository is empty."}));
    });
    let create_ref = github.mock(|when, then| {
        when.method(POST).path("/repos/acme/widgets/git/refs");
        then.status(201).json_body(json!({"object": {"sha": "unused"}}));
    });
    let file_write = mock_file_write(github, "README.md", "main");
    let close = github.mock(|when, then| {
        when.method(PATCH)
            .path("/repos/acme/widgets/issues/1")
            .json_body(json!({"state": "closed"}));
        then.status(200).json_body(json!({"number": 1, "state": "closed"}));
    });
    let create_pull = github.mock(|when, then| {
        when.method(POST).path("/repos/acme/widgets/pulls");
        then.status(201).json_body(json!({"number": 1, "head": {"ref": "main"}}));
    });
    let _analysis = mock_assistant_reply(
        &fixture.assistant,
        ANALYZE_MARKER,
        "Clear enough, I'll start working on it.",
    );
    let _codegen = mock_assistant_reply(
        &fixture.assistant,
        CODEGEN_MARKER,
        "Here is the README.\n\n```markdown README.md\n# widgets\n\nA widget library.\n```",
    );

    let report = fixture.poller.poll_once().await;
    assert_eq!(report.new_issues, 1);
    assert_eq!(report.failed_issues, 0);

    base_ref.assert_calls(1);
    create_ref.assert_calls(0);
    file_write[1].assert_calls(1);
    close.assert_calls(1);
    create_pull.assert_calls(0);
    // analysis, starting work, direct commit summary
    comment_post.assert_calls(3);

    let record = fixture
        .store
        .get("acme", "widgets", 1)
        .expect("load record")
        .expect("record saved");
    assert_eq!(record.status, IssueStatus::Completed);
    assert_eq!(record.branch_name.as_deref(), Some("main"));
    assert!(record.completed_at.is_some());
}
