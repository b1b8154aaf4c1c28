use std::sync::Arc;

use anyhow::{Context, Result};
use rook_ai::OpenRouterClient;
use rook_github::{GithubApiClient, IssueTracker};
use rook_state::IssueStateStore;
use rook_webhook::run_webhook_server;
use rook_workflow::{IssueAgent, IssueLocks, IssuePoller};

use crate::cli_args::AgentArgs;
use crate::config::RookConfig;

pub(crate) async fn run_agent(config: RookConfig, args: &AgentArgs) -> Result<()> {
    let webhook_mode = config.webhook_mode(args.webhook);
    let repositories = config.validate_for_agent(webhook_mode)?;
    tracing::info!("effective configuration:\n{}", config.render_masked());

    let store = IssueStateStore::open(&config.state_db_path).with_context(|| {
        format!(
            "failed to open state database {}",
            config.state_db_path.display()
        )
    })?;
    let github = GithubApiClient::new(config.github_client_config())?;
    let identity = match config.github.login.trim() {
        "" => github
            .resolve_login()
            .await
            .context("failed to resolve GitHub identity")?,
        login => login.to_string(),
    };
    tracing::info!(identity = %identity, "authenticated with GitHub");
    let llm = OpenRouterClient::new(config.openrouter_config())
        .context("failed to build assistant client")?;

    let agent = Arc::new(IssueAgent::new(
        Arc::new(github),
        Arc::new(llm),
        Arc::new(store),
        identity,
        config.agent_settings(),
    ));
    let locks = IssueLocks::new();

    if webhook_mode {
        if args.once {
            tracing::warn!("--once has no effect in webhook mode");
        }
        return run_webhook_server(config.webhook_server_config(repositories), agent, locks).await;
    }
    IssuePoller::new(agent, locks, config.poller_config(repositories))
        .run(args.once)
        .await
}
