//! # tlsync
//!
//! 命令行入口：读取 `.env`，按 `-v/-q/--log-format` 初始化日志，然后分派子命令。

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use cli::{Cli, Commands};
use commands::{run_info, run_pipeline, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    observability::init_with_config(cli.observability())?;

    let command = match &cli.command {
        Commands::Run(_) => "run",
        Commands::Validate(_) => "validate",
        Commands::Info(_) => "info",
    };
    info!(version = env!("CARGO_PKG_VERSION"), command, "tlsync starting");

    let result = match &cli.command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        error!(command, error = %e, "Command failed");
    }
    result
}
