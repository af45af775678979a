use clap::Parser;
use netdisk::state::AppState;
use tracing::Level;

mod cli;

use cli::{execute_command, load_config, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli).await?;
    let state = AppState::open(config).await?;

    let result = match cli.command {
        Some(command) => execute_command(&state, command).await,
        None => Ok(()),
    };

    state.shutdown().await;
    result
}
