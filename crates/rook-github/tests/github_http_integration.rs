use httpmock::prelude::*;
use rook_github::{GithubApiClient, GithubClientConfig, IssueTracker, NewPullRequest, RepoRef};
use serde_json::{json, Value};

fn client(server: &MockServer) -> GithubApiClient {
    let mut config = GithubClientConfig::new(server.base_url(), "test-token");
    config.retry_max_attempts = 2;
    config.retry_base_delay_ms = 1;
    GithubApiClient::new(config).expect("github client")
}

fn repo() -> RepoRef {
    RepoRef::new("acme", "widgets")
}

fn issue_json(number: u64, title: &str) -> Value {
    json!({
        "number": number,
        "title": title,
        "body": "details",
        "user": {"login": "alice"},
        "assignees": [{"login": "rook-bot"}],
        "state": "open",
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-02T00:00:00Z"
    })
}

#[tokio::test]
async fn integration_resolve_login_sends_auth_and_api_version_headers() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/user")
            .header("authorization", "Bearer test-token")
            .header("x-github-api-version", "2022-11-28")
            .header("accept", "application/vnd.github+json");
        then.status(200).json_body(json!({"login": "rook-bot"}));
    });

    let login = client(&server).resolve_login().await.expect("login");
    mock.assert_calls(1);
    assert_eq!(login, "rook-bot");
}

#[tokio::test]
async fn integration_list_assigned_open_issues_paginates_and_drops_pull_requests() {
    let server = MockServer::start();
    let first_page = (1..=100)
        .map(|number| {
            let mut issue = issue_json(number, "issue");
            if number == 7 {
                issue["pull_request"] = json!({"url": "https://example.invalid/pr/7"});
            }
            issue
        })
        .collect::<Vec<_>>();
    let page_one = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/issues")
            .query_param("state", "open")
            .query_param("assignee", "rook-bot")
            .query_param("per_page", "100")
            .query_param("page", "1");
        then.status(200).json_body(Value::Array(first_page));
    });
    let page_two = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/issues")
            .query_param("page", "2");
        then.status(200)
            .json_body(json!([issue_json(101, "last page issue")]));
    });

    let issues = client(&server)
        .list_assigned_open_issues(&repo(), "rook-bot")
        .await
        .expect("issues");
    page_one.assert_calls(1);
    page_two.assert_calls(1);
    assert_eq!(issues.len(), 100);
    assert!(issues.iter().all(|issue| issue.number != 7));
    assert_eq!(issues.last().map(|issue| issue.number), Some(101));
}

#[tokio::test]
async fn integration_server_errors_are_retried_then_reported_with_status() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets");
        then.status(502).body("bad gateway");
    });

    let error = client(&server)
        .get_repository(&repo())
        .await
        .expect_err("502 should surface");
    mock.assert_calls(2);
    assert_eq!(
        error.to_string(),
        "github api get repository failed with status 502: bad gateway"
    );
}

#[tokio::test]
async fn integration_create_branch_reads_base_ref_then_creates_ref() {
    let server = MockServer::start();
    let base = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/git/ref/heads/main");
        then.status(200)
            .json_body(json!({"ref": "refs/heads/main", "object": {"sha": "abc123"}}));
    });
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/git/refs")
            .json_body(json!({"ref": "refs/heads/rook/issue-5", "sha": "abc123"}));
        then.status(201)
            .json_body(json!({"ref": "refs/heads/rook/issue-5", "object": {"sha": "abc123"}}));
    });

    client(&server)
        .create_branch(&repo(), "rook/issue-5", "main")
        .await
        .expect("branch");
    base.assert_calls(1);
    create.assert_calls(1);
}

#[tokio::test]
async fn regression_create_branch_on_empty_repository_reports_conflict_status() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/git/ref/heads/main");
        then.status(409)
            .json_body(json!({"message": "Git Repository is empty."}));
    });

    let error = client(&server)
        .create_branch(&repo(), "rook/issue-5", "main")
        .await
        .expect_err("empty repository");
    let rendered = error.to_string();
    assert!(rendered.contains("409"), "{rendered}");
    assert!(rendered.contains("empty"), "{rendered}");
}

#[tokio::test]
async fn integration_put_file_includes_existing_sha_and_base64_content() {
    let server = MockServer::start();
    let lookup = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/contents/src/lib.rs")
            .query_param("ref", "rook/issue-5");
        then.status(200).json_body(json!({"sha": "old-blob"}));
    });
    let write = server.mock(|when, then| {
        when.method(PUT)
            .path("/repos/acme/widgets/contents/src/lib.rs")
            .json_body(json!({
                "message": "Update src/lib.rs for issue #5",
                "content": "Zm4gbWFpbigpIHt9",
                "branch": "rook/issue-5",
                "sha": "old-blob"
            }));
        then.status(200).json_body(json!({"content": {"sha": "new-blob"}}));
    });

    client(&server)
        .put_file(
            &repo(),
            "src/lib.rs",
            "fn main() {}",
            "Update src/lib.rs for issue #5",
            "rook/issue-5",
        )
        .await
        .expect("put file");
    lookup.assert_calls(1);
    write.assert_calls(1);
}

#[tokio::test]
async fn integration_get_file_sha_maps_not_found_to_none() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/contents/new.txt");
        then.status(404).json_body(json!({"message": "Not Found"}));
    });

    let sha = client(&server)
        .get_file_sha(&repo(), "new.txt", "main")
        .await
        .expect("lookup");
    assert_eq!(sha, None);
}

#[tokio::test]
async fn integration_create_pull_request_and_list_review_comments() {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/pulls")
            .json_body_includes(
                json!({"head": "rook/issue-5", "base": "main", "body": "Fixes #5"}).to_string(),
            );
        then.status(201).json_body(json!({
            "number": 17,
            "title": "Fix: thing",
            "body": "Fixes #5",
            "html_url": "https://github.com/acme/widgets/pull/17",
            "head": {"ref": "rook/issue-5"}
        }));
    });
    let reviews = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/pulls/17/comments")
            .query_param("page", "1");
        then.status(200).json_body(json!([{
            "id": 900,
            "body": "rename this",
            "user": {"login": "alice"},
            "path": "src/lib.rs",
            "created_at": "2026-01-03T00:00:00Z"
        }]));
    });

    let client = client(&server);
    let pull = client
        .create_pull_request(
            &repo(),
            &NewPullRequest {
                title: "Fix: thing".to_string(),
                head: "rook/issue-5".to_string(),
                base: "main".to_string(),
                body: "Fixes #5".to_string(),
            },
        )
        .await
        .expect("create pr");
    assert_eq!(pull.number, 17);
    assert_eq!(pull.head.ref_name, "rook/issue-5");

    let comments = client
        .list_review_comments(&repo(), 17)
        .await
        .expect("review comments");
    create.assert_calls(1);
    reviews.assert_calls(1);
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].body_text(), "rename this");
}

#[tokio::test]
async fn integration_close_issue_patches_state() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PATCH)
            .path("/repos/acme/widgets/issues/5")
            .json_body(json!({"state": "closed"}));
        then.status(200).json_body(json!({"number": 5, "state": "closed"}));
    });

    client(&server)
        .close_issue(&repo(), 5)
        .await
        .expect("close");
    mock.assert_calls(1);
}
