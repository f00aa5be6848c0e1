use anyhow::Context;
use aq_processor::cli::{run, Cli, Outcome};
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let outcome = run(cli).await.context("aq-processor failed")?;

    Ok(match outcome {
        Outcome::Success => ExitCode::SUCCESS,
        Outcome::Failed => ExitCode::FAILURE,
    })
}
