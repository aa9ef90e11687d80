//! ReviewRelay CLI: relays new record.club reviews into Discord channels.
//!
//! Runs the polling daemon, single manual cycles, and the admin commands
//! that manage tracked users and per-server routing.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
