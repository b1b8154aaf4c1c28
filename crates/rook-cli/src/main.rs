mod admin_commands;
mod agent_command;
mod bootstrap_helpers;
mod cli_args;
mod config;
mod stats_command;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Agent(args) => {
            let config = config::load_config(&cli.config)?;
            agent_command::run_agent(config, &args).await
        }
        Command::Stats(args) => {
            let config = config::load_config(&cli.config)?;
            stats_command::run_stats(&config, &args)
        }
        Command::Init(args) => admin_commands::run_init(&cli.config, &args),
        Command::Forget(args) => {
            let config = config::load_config(&cli.config)?;
            admin_commands::run_forget(&config, &args)
        }
    }
}
