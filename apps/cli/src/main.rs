//! paperconcepts CLI: exam-paper concept extraction and trend analysis.
//!
//! Registers exam papers, extracts the concepts each one tests with a
//! language model, and answers cross-year questions about them.

mod commands;
mod query;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
