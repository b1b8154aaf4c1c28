//! `rook.toml` loading, environment overlay, and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rook_ai::{OpenRouterConfig, DEFAULT_OPENROUTER_MODEL};
use rook_core::mask_secret;
use rook_github::{GithubClientConfig, RepoRef};
use rook_webhook::WebhookServerConfig;
use rook_workflow::{
    CodegenRetryPolicy, IssueAgentSettings, PollerConfig, ReplyClassifier, DEFAULT_BRANCH_PREFIX,
    DEFAULT_MAX_TOKENS,
};
use serde::{Deserialize, Serialize};

pub(crate) const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
pub(crate) const OPENROUTER_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub(crate) const WEBHOOK_SECRET_ENV: &str = "WEBHOOK_SECRET";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct RookConfig {
    pub(crate) state_db_path: PathBuf,
    pub(crate) github: GithubSection,
    pub(crate) assistant: AssistantSection,
    pub(crate) poll: PollSection,
    pub(crate) webhook: WebhookSection,
    pub(crate) workflow: WorkflowSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct GithubSection {
    pub(crate) api_base: String,
    pub(crate) token: String,
    pub(crate) login: String,
    pub(crate) request_timeout_ms: u64,
    pub(crate) retry_max_attempts: usize,
    pub(crate) retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct AssistantSection {
    pub(crate) api_base: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    pub(crate) temperature: Option<f32>,
    pub(crate) request_timeout_ms: u64,
    pub(crate) max_retries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct PollSection {
    pub(crate) interval_seconds: u64,
    pub(crate) repositories: Vec<String>,
    pub(crate) stuck_threshold_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct WebhookSection {
    pub(crate) enabled: bool,
    pub(crate) bind: String,
    pub(crate) secret: String,
    pub(crate) workers: usize,
    pub(crate) queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct WorkflowSection {
    pub(crate) branch_prefix: String,
    pub(crate) codegen_backoff_seconds: Vec<u64>,
    pub(crate) codegen_max_attempts: Option<usize>,
    pub(crate) extra_question_phrases: Vec<String>,
    pub(crate) extra_ready_phrases: Vec<String>,
}

impl Default for RookConfig {
    fn default() -> Self {
        Self {
            state_db_path: PathBuf::from("./rook-state.db"),
            github: GithubSection::default(),
            assistant: AssistantSection::default(),
            poll: PollSection::default(),
            webhook: WebhookSection::default(),
            workflow: WorkflowSection::default(),
        }
    }
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: String::new(),
            login: String::new(),
            request_timeout_ms: 30_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

impl Default for AssistantSection {
    fn default() -> Self {
        Self {
            api_base: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            model: DEFAULT_OPENROUTER_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            request_timeout_ms: 300_000,
            max_retries: 0,
        }
    }
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            repositories: Vec::new(),
            stuck_threshold_seconds: 600,
        }
    }
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "0.0.0.0:8080".to_string(),
            secret: String::new(),
            workers: 4,
            queue_capacity: 64,
        }
    }
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            codegen_backoff_seconds: vec![60, 120, 240],
            codegen_max_attempts: None,
            extra_question_phrases: Vec::new(),
            extra_ready_phrases: Vec::new(),
        }
    }
}

/// Reads `path` and overlays secrets from the process environment.
pub(crate) fn load_config(path: &Path) -> Result<RookConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| {
        format!(
            "failed to read config {} (run `rook init` to create one)",
            path.display()
        )
    })?;
    let mut config = parse_config(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.apply_env_overrides(|name| std::env::var(name).ok());
    Ok(config)
}

pub(crate) fn parse_config(raw: &str) -> Result<RookConfig> {
    toml::from_str(raw).context("invalid rook configuration")
}

impl RookConfig {
    /// Non-empty environment values replace the file's secrets.
    pub(crate) fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(token) = non_empty(GITHUB_TOKEN_ENV) {
            self.github.token = token;
        }
        if let Some(api_key) = non_empty(OPENROUTER_API_KEY_ENV) {
            self.assistant.api_key = api_key;
        }
        if let Some(secret) = non_empty(WEBHOOK_SECRET_ENV) {
            self.webhook.secret = secret;
        }
    }

    pub(crate) fn webhook_mode(&self, flag: bool) -> bool {
        flag || self.webhook.enabled
    }

    /// Checks everything `rook agent` needs and returns the parsed repositories.
    pub(crate) fn validate_for_agent(&self, webhook_mode: bool) -> Result<Vec<RepoRef>> {
        let repositories = self
            .poll
            .repositories
            .iter()
            .map(|raw| RepoRef::parse(raw))
            .collect::<Result<Vec<_>>>()?;
        if !webhook_mode && repositories.is_empty() {
            bail!("poll.repositories must list at least one owner/repo");
        }
        if self.github.token.trim().is_empty() {
            bail!("github.token is empty; set it in the config or via {GITHUB_TOKEN_ENV}");
        }
        if self.assistant.api_key.trim().is_empty() {
            bail!(
                "assistant.api_key is empty; set it in the config or via {OPENROUTER_API_KEY_ENV}"
            );
        }
        if self.workflow.codegen_backoff_seconds.is_empty() {
            bail!("workflow.codegen_backoff_seconds must not be empty");
        }
        if self.workflow.codegen_max_attempts == Some(0) {
            bail!("workflow.codegen_max_attempts must be at least 1 when set");
        }
        if self.poll.interval_seconds == 0 {
            bail!("poll.interval_seconds must be greater than zero");
        }
        Ok(repositories)
    }

    /// Effective configuration with every secret masked.
    pub(crate) fn render_masked(&self) -> String {
        let mut masked = self.clone();
        masked.github.token = mask_secret(&self.github.token);
        masked.assistant.api_key = mask_secret(&self.assistant.api_key);
        masked.webhook.secret = mask_secret(&self.webhook.secret);
        toml::to_string_pretty(&masked)
            .unwrap_or_else(|error| format!("<failed to render configuration: {error}>"))
    }

    pub(crate) fn github_client_config(&self) -> GithubClientConfig {
        GithubClientConfig {
            api_base: self.github.api_base.clone(),
            token: self.github.token.clone(),
            request_timeout_ms: self.github.request_timeout_ms,
            retry_max_attempts: self.github.retry_max_attempts,
            retry_base_delay_ms: self.github.retry_base_delay_ms,
        }
    }

    pub(crate) fn openrouter_config(&self) -> OpenRouterConfig {
        let mut config = OpenRouterConfig::new(&self.assistant.api_base, &self.assistant.api_key);
        config.request_timeout_ms = self.assistant.request_timeout_ms;
        config.max_retries = self.assistant.max_retries;
        config
    }

    pub(crate) fn agent_settings(&self) -> IssueAgentSettings {
        IssueAgentSettings {
            model: self.assistant.model.clone(),
            max_tokens: self.assistant.max_tokens,
            temperature: self.assistant.temperature,
            branch_prefix: self.workflow.branch_prefix.clone(),
            retry_policy: CodegenRetryPolicy {
                schedule: self
                    .workflow
                    .codegen_backoff_seconds
                    .iter()
                    .map(|seconds| Duration::from_secs(*seconds))
                    .collect(),
                max_attempts: self.workflow.codegen_max_attempts,
            },
            classifier: ReplyClassifier::with_extra_phrases(
                &self.workflow.extra_question_phrases,
                &self.workflow.extra_ready_phrases,
            ),
        }
    }

    pub(crate) fn poller_config(&self, repositories: Vec<RepoRef>) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_secs(self.poll.interval_seconds),
            repositories,
            stuck_threshold: Duration::from_secs(self.poll.stuck_threshold_seconds),
        }
    }

    pub(crate) fn webhook_server_config(&self, repositories: Vec<RepoRef>) -> WebhookServerConfig {
        WebhookServerConfig {
            bind: self.webhook.bind.clone(),
            secret: Some(self.webhook.secret.clone()).filter(|secret| !secret.trim().is_empty()),
            workers: self.webhook.workers,
            queue_capacity: self.webhook.queue_capacity,
            repositories,
        }
    }
}
