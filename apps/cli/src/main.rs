//! autoblogger CLI — rule-driven article automation.
//!
//! Takes a source article, rewrites it through a language model, enriches
//! it with SEO metadata and a licensed image, and publishes it to the CMS.

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
