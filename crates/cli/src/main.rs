// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use roost::client::{self, ClientArgs, TailArgs};
use roost::config::Config;

#[derive(Parser)]
#[command(name = "roost", version, about = "Multi-agent terminal orchestrator.")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show the full orchestrator status.
    Status(ClientArgs),
    /// List supervised agents.
    Agents(ClientArgs),
    /// Force one assignment pass.
    Tick(ClientArgs),
    /// Show the headroom guard state.
    Headroom(ClientArgs),
    /// List stored checkpoints.
    Checkpoints(ClientArgs),
    /// Stream events to stdout.
    Tail(TailArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(command) = cli.subcommand {
        let result = match command {
            Commands::Status(args) => client::status(&args).await,
            Commands::Agents(args) => client::agents(&args).await,
            Commands::Tick(args) => client::tick(&args).await,
            Commands::Headroom(args) => client::headroom(&args).await,
            Commands::Checkpoints(args) => client::checkpoints(&args).await,
            Commands::Tail(args) => client::tail(&args).await,
        };
        if let Err(e) = result {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let config = cli.config;
    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    if let Err(e) = roost::run::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
