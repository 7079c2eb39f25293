//! relflow CLI entry point.
//!
//! Binary name: `relflow`
//!
//! Parses CLI arguments, initializes tracing and the workflow database, then
//! dispatches to the appropriate command handler.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use relflow_observe::tracing_setup::{LogFormat, init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Pretty };
    init_tracing(format, cli.otel).map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;

    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Listing definitions doesn't need the database
    if let Commands::Definitions = cli.command {
        return cli::definitions::handle_definitions(cli.json);
    }

    let state = AppState::init(cli.data_dir).await?;

    match cli.command {
        Commands::Run { definition, params } => {
            cli::workflow::handle_run(&definition, &params, &state, cli.json).await
        }
        Commands::Resume { workflow_id, retry } => {
            cli::workflow::handle_resume(&workflow_id, &retry, &state, cli.json).await
        }
        Commands::List { limit } => cli::workflow::handle_list(limit, &state, cli.json).await,
        Commands::Show { workflow_id } => cli::workflow::handle_show(&workflow_id, &state, cli.json).await,
        Commands::Definitions => cli::definitions::handle_definitions(cli.json),
    }
}
