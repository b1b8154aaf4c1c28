use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::transport_helpers::{
    is_retryable_github_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};
use crate::{
    GithubComment, GithubCommentCreateResponse, GithubIssue, GithubPullRequest, GithubRepository,
    GithubReviewComment, IssueTracker, NewPullRequest, RepoRef,
};

const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
/// Public struct `GithubClientConfig` used across Rook components.
pub struct GithubClientConfig {
    pub api_base: String,
    pub token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl GithubClientConfig {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            token: token.into(),
            request_timeout_ms: 30_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Clone)]
/// REST client for every repository the agent watches.
pub struct GithubApiClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GithubApiClient {
    pub fn new(config: GithubClientConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            bail!("github token is empty");
        }
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("rook-issue-agent"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {}", config.token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid github authorization header")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create github api client")?;
        Ok(Self {
            http: client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    fn repo_url(&self, repo: &RepoRef, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_base, repo.owner, repo.name, suffix
        )
    }

    async fn paginate<T, F>(&self, operation: &str, mut page_request: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: FnMut(&str) -> reqwest::RequestBuilder,
    {
        let mut page = 1_u32;
        let mut rows = Vec::new();
        loop {
            let page_value = page.to_string();
            let chunk: Vec<T> = self
                .request_json(operation, || page_request(page_value.as_str()))
                .await?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < PAGE_SIZE {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }

    async fn request_json<T, F>(&self, operation: &str, request_builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        match self.send(operation, request_builder, false).await? {
            Some(response) => response
                .json::<T>()
                .await
                .with_context(|| format!("failed to decode github {operation}")),
            None => bail!("github api {operation} returned no body"),
        }
    }

    async fn request_json_optional<T, F>(
        &self,
        operation: &str,
        request_builder: F,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        match self.send(operation, request_builder, true).await? {
            Some(response) => Ok(Some(
                response
                    .json::<T>()
                    .await
                    .with_context(|| format!("failed to decode github {operation}"))?,
            )),
            None => Ok(None),
        }
    }

    async fn send<F>(
        &self,
        operation: &str,
        mut request_builder: F,
        allow_not_found: bool,
    ) -> Result<Option<reqwest::Response>>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder()
                .header("x-rook-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(Some(response));
                    }
                    if allow_not_found && status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(None);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_github_status(status.as_u16())
                    {
                        let delay = retry_delay(self.retry_base_delay_ms, attempt, retry_after);
                        tracing::debug!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying github request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    bail!(
                        "github api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("github api {operation} request failed"));
                }
            }
        }
    }
}

#[async_trait]
impl IssueTracker for GithubApiClient {
    async fn resolve_login(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Viewer {
            login: String,
        }

        let viewer: Viewer = self
            .request_json("resolve login", || {
                self.http.get(format!("{}/user", self.api_base))
            })
            .await?;
        Ok(viewer.login)
    }

    async fn get_issue(&self, repo: &RepoRef, issue_number: u64) -> Result<GithubIssue> {
        let url = self.repo_url(repo, &format!("/issues/{issue_number}"));
        self.request_json("get issue", || self.http.get(url.as_str()))
            .await
    }

    async fn list_assigned_open_issues(
        &self,
        repo: &RepoRef,
        assignee: &str,
    ) -> Result<Vec<GithubIssue>> {
        let url = self.repo_url(repo, "/issues");
        let issues: Vec<GithubIssue> = self
            .paginate("list assigned issues", |page| {
                self.http.get(url.as_str()).query(&[
                    ("state", "open"),
                    ("assignee", assignee),
                    ("per_page", "100"),
                    ("page", page),
                ])
            })
            .await?;
        Ok(issues
            .into_iter()
            .filter(|issue| !issue.is_pull_request())
            .collect())
    }

    async fn list_issue_comments(
        &self,
        repo: &RepoRef,
        issue_number: u64,
    ) -> Result<Vec<GithubComment>> {
        let url = self.repo_url(repo, &format!("/issues/{issue_number}/comments"));
        self.paginate("list issue comments", |page| {
            self.http
                .get(url.as_str())
                .query(&[("per_page", "100"), ("page", page)])
        })
        .await
    }

    async fn create_issue_comment(
        &self,
        repo: &RepoRef,
        issue_number: u64,
        body: &str,
    ) -> Result<GithubCommentCreateResponse> {
        let url = self.repo_url(repo, &format!("/issues/{issue_number}/comments"));
        let payload = json!({ "body": body });
        self.request_json("create issue comment", || {
            self.http.post(url.as_str()).json(&payload)
        })
        .await
    }

    async fn close_issue(&self, repo: &RepoRef, issue_number: u64) -> Result<()> {
        let url = self.repo_url(repo, &format!("/issues/{issue_number}"));
        let payload = json!({ "state": "closed" });
        let _: serde_json::Value = self
            .request_json("close issue", || self.http.patch(url.as_str()).json(&payload))
            .await?;
        Ok(())
    }

    async fn get_repository(&self, repo: &RepoRef) -> Result<GithubRepository> {
        let url = self.repo_url(repo, "");
        self.request_json("get repository", || self.http.get(url.as_str()))
            .await
    }

    async fn create_branch(&self, repo: &RepoRef, branch: &str, base_branch: &str) -> Result<()> {
        #[derive(Deserialize)]
        struct GitObject {
            sha: String,
        }
        #[derive(Deserialize)]
        struct GitRef {
            object: GitObject,
        }

        let base_url = self.repo_url(repo, &format!("/git/ref/heads/{base_branch}"));
        let base: GitRef = self
            .request_json("get base ref", || self.http.get(base_url.as_str()))
            .await?;

        let refs_url = self.repo_url(repo, "/git/refs");
        let payload = json!({
            "ref": format!("refs/heads/{branch}"),
            "sha": base.object.sha,
        });
        let _: GitRef = self
            .request_json("create branch", || {
                self.http.post(refs_url.as_str()).json(&payload)
            })
            .await?;
        Ok(())
    }

    async fn get_file_sha(
        &self,
        repo: &RepoRef,
        path: &str,
        branch: &str,
    ) -> Result<Option<String>> {
        #[derive(Deserialize)]
        struct ContentEntry {
            sha: String,
        }

        let url = self.repo_url(repo, &format!("/contents/{}", path.trim_start_matches('/')));
        let entry: Option<ContentEntry> = self
            .request_json_optional("get file", || {
                self.http.get(url.as_str()).query(&[("ref", branch)])
            })
            .await?;
        Ok(entry.map(|entry| entry.sha))
    }

    async fn put_file(
        &self,
        repo: &RepoRef,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<()> {
        let existing_sha = self.get_file_sha(repo, path, branch).await?;
        let url = self.repo_url(repo, &format!("/contents/{}", path.trim_start_matches('/')));
        let mut payload = json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = existing_sha {
            payload["sha"] = json!(sha);
        }
        let _: serde_json::Value = self
            .request_json("put file", || self.http.put(url.as_str()).json(&payload))
            .await?;
        Ok(())
    }

    async fn get_pull_request(&self, repo: &RepoRef, number: u64) -> Result<GithubPullRequest> {
        let url = self.repo_url(repo, &format!("/pulls/{number}"));
        self.request_json("get pull request", || self.http.get(url.as_str()))
            .await
    }

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        request: &NewPullRequest,
    ) -> Result<GithubPullRequest> {
        let url = self.repo_url(repo, "/pulls");
        self.request_json("create pull request", || {
            self.http.post(url.as_str()).json(request)
        })
        .await
    }

    async fn list_review_comments(
        &self,
        repo: &RepoRef,
        pull_number: u64,
    ) -> Result<Vec<GithubReviewComment>> {
        let url = self.repo_url(repo, &format!("/pulls/{pull_number}/comments"));
        self.paginate("list review comments", |page| {
            self.http
                .get(url.as_str())
                .query(&[("per_page", "100"), ("page", page)])
        })
        .await
    }
}
