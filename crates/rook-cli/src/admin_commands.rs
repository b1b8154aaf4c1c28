use std::path::Path;

use anyhow::{bail, Context, Result};
use rook_core::write_text_atomic;
use rook_github::RepoRef;
use rook_state::IssueStateStore;

use crate::cli_args::{ForgetArgs, InitArgs};
use crate::config::RookConfig;

pub(crate) const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Rook configuration.
# Secrets can also come from GITHUB_TOKEN, OPENROUTER_API_KEY and WEBHOOK_SECRET,
# which take precedence over the values below.

state_db_path = "./rook-state.db"

[github]
api_base = "https://api.github.com"
token = ""
# Leave empty to use the login of the token's owner.
login = ""
request_timeout_ms = 30000
retry_max_attempts = 3
retry_base_delay_ms = 500

[assistant]
api_base = "https://openrouter.ai/api/v1"
api_key = ""
model = "openrouter/auto"
max_tokens = 8096
request_timeout_ms = 300000
max_retries = 0

[poll]
interval_seconds = 60
repositories = ["owner/repo"]
# Implementations idle longer than this are restarted.
stuck_threshold_seconds = 600

[webhook]
enabled = false
bind = "0.0.0.0:8080"
secret = ""
workers = 4
queue_capacity = 64

[workflow]
branch_prefix = "rook"
codegen_backoff_seconds = [60, 120, 240]
# Unset retries rate limits and upstream 5xx forever.
# codegen_max_attempts = 10
extra_question_phrases = []
extra_ready_phrases = []
"#;

pub(crate) fn run_init(path: &Path, args: &InitArgs) -> Result<()> {
    if path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    write_text_atomic(path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

pub(crate) fn run_forget(config: &RookConfig, args: &ForgetArgs) -> Result<()> {
    let repo = RepoRef::parse(&args.repository)?;
    let store = IssueStateStore::open(&config.state_db_path).with_context(|| {
        format!(
            "failed to open state database {}",
            config.state_db_path.display()
        )
    })?;
    let removed = store
        .delete(&repo.owner, &repo.name, args.issue)
        .context("failed to delete issue record")?;
    if removed {
        tracing::info!(repo = %repo, issue = args.issue, "issue record deleted");
        println!("forgot {repo}#{}", args.issue);
    } else {
        println!("no record for {repo}#{}", args.issue);
    }
    Ok(())
}
