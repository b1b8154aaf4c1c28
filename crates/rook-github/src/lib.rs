//! GitHub issue-tracker surface consumed by the Rook workflow.
//!
//! `IssueTracker` is the capability set the workflow needs; `GithubApiClient`
//! implements it over the REST API with exhaustive pagination and transport
//! retries.
mod github_api_client;
mod repo_ref;
pub mod transport_helpers;
mod types;

pub use github_api_client::{GithubApiClient, GithubClientConfig};
pub use repo_ref::RepoRef;
pub use types::{
    GithubComment, GithubCommentCreateResponse, GithubIssue, GithubPullRequest,
    GithubPullRequestRef, GithubRepository, GithubReviewComment, GithubUser, NewPullRequest,
};

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
/// Trait contract for `IssueTracker` behavior.
pub trait IssueTracker: Send + Sync {
    async fn resolve_login(&self) -> Result<String>;

    async fn get_issue(&self, repo: &RepoRef, issue_number: u64) -> Result<GithubIssue>;

    async fn list_assigned_open_issues(
        &self,
        repo: &RepoRef,
        assignee: &str,
    ) -> Result<Vec<GithubIssue>>;

    async fn list_issue_comments(
        &self,
        repo: &RepoRef,
        issue_number: u64,
    ) -> Result<Vec<GithubComment>>;

    async fn create_issue_comment(
        &self,
        repo: &RepoRef,
        issue_number: u64,
        body: &str,
    ) -> Result<GithubCommentCreateResponse>;

    async fn close_issue(&self, repo: &RepoRef, issue_number: u64) -> Result<()>;

    async fn get_repository(&self, repo: &RepoRef) -> Result<GithubRepository>;

    async fn create_branch(&self, repo: &RepoRef, branch: &str, base_branch: &str) -> Result<()>;

    async fn get_file_sha(
        &self,
        repo: &RepoRef,
        path: &str,
        branch: &str,
    ) -> Result<Option<String>>;

    /// Creates or replaces `path` on `branch` with the full `content`.
    async fn put_file(
        &self,
        repo: &RepoRef,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<()>;

    async fn get_pull_request(&self, repo: &RepoRef, number: u64) -> Result<GithubPullRequest>;

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        request: &NewPullRequest,
    ) -> Result<GithubPullRequest>;

    async fn list_review_comments(
        &self,
        repo: &RepoRef,
        pull_number: u64,
    ) -> Result<Vec<GithubReviewComment>>;
}
