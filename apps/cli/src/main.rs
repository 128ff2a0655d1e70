//! OrgBrief CLI: durable, resumable enrichment of organization records.
//!
//! Imports CRM records, queues entities for document extraction, web
//! enrichment, synthesis and report generation, and drains the queue in
//! time-boxed invocations.

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
