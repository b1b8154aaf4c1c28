use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "rook",
    about = "Turns assigned GitHub issues into pull requests with an LLM assistant",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        env = "ROOK_CONFIG",
        default_value = "rook.toml",
        help = "Path to the TOML configuration file"
    )]
    pub(crate) config: PathBuf,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Watch configured repositories and work assigned issues.
    Agent(AgentArgs),
    /// Show token usage and cost per tracked issue.
    Stats(StatsArgs),
    /// Write a default configuration file.
    Init(InitArgs),
    /// Delete the stored record for one issue.
    Forget(ForgetArgs),
}

#[derive(Debug, Args)]
pub(crate) struct AgentArgs {
    #[arg(long, help = "Run a single poll cycle and exit")]
    pub(crate) once: bool,

    #[arg(
        long,
        help = "Serve the webhook endpoint instead of polling (also enabled by webhook.enabled)"
    )]
    pub(crate) webhook: bool,
}

#[derive(Debug, Args)]
pub(crate) struct StatsArgs {
    #[arg(long, help = "Also export the records as CSV")]
    pub(crate) export: bool,

    #[arg(long, default_value = "usage_stats.csv", help = "CSV export destination")]
    pub(crate) file: PathBuf,
}

#[derive(Debug, Args)]
pub(crate) struct InitArgs {
    #[arg(long, help = "Overwrite an existing configuration file")]
    pub(crate) force: bool,
}

#[derive(Debug, Args)]
pub(crate) struct ForgetArgs {
    #[arg(help = "Repository in owner/repo form")]
    pub(crate) repository: String,

    #[arg(help = "Issue number")]
    pub(crate) issue: u64,
}
