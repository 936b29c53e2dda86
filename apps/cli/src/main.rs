//! backfill CLI: fill a missing attribute on one collection from another.
//!
//! Scans the source collection, resolves owner keys against the reference
//! collection in store-sized chunks, and commits every update in one batch.

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
