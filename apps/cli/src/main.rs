//! quizharvest CLI: crawl quiz listings, normalize them, publish them once.
//!
//! Fetches paginated question pages into local raw items, parses them into
//! a record set, and pushes unpublished records to a remote store.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    // A missing .env is fine; credentials may come from the real environment.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
